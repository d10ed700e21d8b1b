//! The log store: three event streams feeding bounded buffers, with a pull-based fallback.
//!
//! Each stream runs as its own producer task (see [stream]) and pushes raw payloads onto a
//! bounded queue. The store is the only consumer; it formats each payload and appends it to the
//! buffer for its kind and to the combined buffer. Nothing else writes to the buffers, so they
//! need no locking.

use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{Error, Result, anyhow};
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

pub mod buffer;
pub mod format;
pub mod stream;

pub use buffer::{LogBuffer, MAX_KEEP};
pub use stream::{SseSource, StreamBody, StreamEvent, StreamHandle, StreamSource, StreamTarget};

use crate::{api::Backend, cfg::Config};

/// Number of lines shown in a preview.
pub const PREVIEW_LINES: usize = 20;

pub const FETCH_FAILED: &str = "failed to fetch logs from server";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogKind {
    Tx,
    Node,
    System,
}

impl LogKind {
    pub const ALL: [LogKind; 3] = [LogKind::Tx, LogKind::Node, LogKind::System];

    fn index(self) -> usize {
        match self {
            LogKind::Tx => 0,
            LogKind::Node => 1,
            LogKind::System => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Tx => "tx",
            LogKind::Node => "node",
            LogKind::System => "system",
        }
    }

    pub fn stream_path(&self) -> &'static str {
        match self {
            LogKind::Tx => "tx_stream",
            LogKind::Node => "node_log_stream",
            LogKind::System => "system_log_stream",
        }
    }

    /// What the store reports when this kind's stream drops.
    pub fn interrupted_message(&self) -> &'static str {
        match self {
            LogKind::Tx => "transaction log stream interrupted",
            LogKind::Node => "node log stream interrupted",
            LogKind::System => "system log stream interrupted",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow!("unknown log kind {s:?} - expected tx, node or system"))
    }
}

/// What applying one stream event did to the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ingested {
    Line {
        kind: LogKind,
        /// The payload as received, before formatting.
        raw: String,
        line: String,
    },
    Failed {
        kind: LogKind,
        message: String,
    },
}

pub struct LogStore {
    backend: Arc<dyn Backend>,
    source: Arc<dyn StreamSource>,
    logs: LogBuffer,
    by_kind: [LogBuffer; 3],
    logs_loading: bool,
    logs_error: Option<String>,
    handles: [Option<StreamHandle>; 3],
    generation: u64,
    events_tx: mpsc::Sender<StreamEvent>,
    events_rx: mpsc::Receiver<StreamEvent>,
    token: Option<String>,
    tail_limit: usize,
}

impl LogStore {
    pub fn new(backend: Arc<dyn Backend>, source: Arc<dyn StreamSource>, config: &Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
        LogStore {
            backend,
            source,
            logs: LogBuffer::default(),
            by_kind: Default::default(),
            logs_loading: false,
            logs_error: None,
            handles: Default::default(),
            generation: 0,
            events_tx,
            events_rx,
            token: config.token().map(str::to_string),
            tail_limit: config.tail_limit,
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|t| !t.is_empty());
    }

    /// The combined buffer, in arrival order.
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn kind_logs(&self, kind: LogKind) -> &LogBuffer {
        &self.by_kind[kind.index()]
    }

    pub fn preview_logs(&self) -> Vec<&str> {
        self.logs.tail(PREVIEW_LINES).collect()
    }

    pub fn logs_error(&self) -> Option<&str> {
        self.logs_error.as_deref()
    }

    pub fn logs_loading(&self) -> bool {
        self.logs_loading
    }

    /// Number of streams currently open.
    pub fn live_streams(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    pub fn is_streaming(&self) -> bool {
        self.live_streams() > 0
    }

    pub fn set_logs(&mut self, lines: Vec<String>) {
        self.logs.set_all(lines);
    }

    pub fn append_log(&mut self, line: String) {
        self.logs.append(line);
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
        for buffer in &mut self.by_kind {
            buffer.clear();
        }
    }

    /// Stop every stream, drop everything buffered or queued, and clear the error.
    pub fn reset(&mut self) {
        self.stop_sse();
        while self.events_rx.try_recv().is_ok() {}
        self.clear_logs();
        self.logs_error = None;
    }

    /// Open the three event streams. Does nothing if any of them is already open.
    pub fn start_sse(&mut self, target: Option<StreamTarget>) -> Result<()> {
        if self.is_streaming() {
            debug!("event streams already open");
            return Ok(());
        }
        let mut target = target.unwrap_or_default();
        if target.token.is_none() {
            target.token = self.token.clone();
        }
        for kind in LogKind::ALL {
            match self
                .source
                .open(kind, self.generation, &target, self.events_tx.clone())
            {
                Ok(handle) => self.handles[kind.index()] = Some(handle),
                Err(e) => {
                    error!(%kind, "failed to open event stream: {e}");
                    self.stop_sse();
                    return Err(e);
                }
            }
        }
        info!(generation = self.generation, "event streams open");
        Ok(())
    }

    /// Close whatever streams are open. Events they already queued are discarded.
    pub fn stop_sse(&mut self) {
        let mut closed = 0;
        for handle in self.handles.iter_mut() {
            if let Some(mut h) = handle.take() {
                h.close();
                closed += 1;
            }
        }
        if closed > 0 {
            self.generation += 1;
            info!(closed, "event streams closed");
        }
    }

    /// Apply one event from a stream. Returns `None` for events from streams that have since
    /// been closed.
    pub fn apply(&mut self, event: StreamEvent) -> Option<Ingested> {
        if event.generation != self.generation {
            debug!(kind = %event.kind, event.generation, "dropping stale stream event");
            return None;
        }
        let kind = event.kind;
        match event.body {
            StreamBody::Message(raw) => {
                let line = format::format_line(kind, &raw, OffsetDateTime::now_utc());
                self.by_kind[kind.index()].append(line.clone());
                self.logs.append(line.clone());
                Some(Ingested::Line { kind, raw, line })
            }
            StreamBody::Error(reason) => {
                error!(%kind, "event stream error: {reason}");
                let message = kind.interrupted_message().to_string();
                self.logs_error = Some(message.clone());
                Some(Ingested::Failed { kind, message })
            }
        }
    }

    /// Apply everything queued so far without waiting.
    pub fn pump(&mut self) -> Vec<Ingested> {
        let mut applied = Vec::new();
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => applied.extend(self.apply(event)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Wait for the next event that changes the store and apply it.
    pub async fn next_ingested(&mut self) -> Option<Ingested> {
        loop {
            let event = self.events_rx.recv().await?;
            if let Some(ingested) = self.apply(event) {
                return Some(ingested);
            }
        }
    }

    /// Fetch recent lines with a single request and replace the combined buffer with them.
    pub async fn fetch_logs(&mut self, limit: Option<usize>) {
        let limit = limit.unwrap_or(self.tail_limit);
        self.logs_loading = true;
        match self.backend.logs_tail(limit, self.token.as_deref()).await {
            Ok(lines) => {
                debug!(count = lines.len(), "fetched log tail");
                self.set_logs(lines);
            }
            Err(e) => {
                warn!("failed to fetch log tail: {e}");
                self.logs_error = Some(FETCH_FAILED.to_string());
            }
        }
        self.logs_loading = false;
    }
}
