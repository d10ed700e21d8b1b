//! Decoder for the `text/event-stream` wire format.

use std::time::Duration;

use tracing::warn;

/// Longest line the decoder buffers while waiting for its terminator. Longer lines are dropped.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// A dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field. Empty for plain messages.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether an `onmessage`-style listener would see this event.
    pub fn is_message(&self) -> bool {
        self.event.is_empty() || self.event == "message"
    }
}

/// Incremental decoder. Feed it chunks as they arrive; a chunk may end anywhere, including in the
/// middle of a line or of a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    partial: Vec<u8>,
    /// How much of `partial` is known to hold no line terminator.
    scanned: usize,
    /// Set while skipping the rest of a line that grew past [MAX_LINE_BYTES].
    overflowed: bool,
    data: String,
    event: String,
    id: Option<String>,
    retry: Option<Duration>,
    seen_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent `retry:` value sent by the server, if any.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.partial.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(offset) = self.partial[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;
            if self.overflowed {
                self.overflowed = false;
                start = end + 1;
                continue;
            }
            let mut line = &self.partial[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = end + 1;
        }
        self.partial.drain(..start);
        self.scanned = self.partial.len();
        if self.partial.len() > MAX_LINE_BYTES {
            warn!(len = self.partial.len(), "dropping over-long event stream line");
            self.partial.clear();
            self.scanned = 0;
            self.overflowed = true;
        }
        events
    }

    /// Flush a trailing line that was never terminated, as happens when the connection closes.
    /// A pending event without its blank line is discarded, as browsers do.
    pub fn finish(&mut self) {
        if !self.partial.is_empty() && !self.overflowed {
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            let _ = self.process_line(&line);
        }
        self.partial.clear();
        self.scanned = 0;
        self.overflowed = false;
        self.reset_event();
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
                self.seen_data = true;
            }
            "event" => self.event = value.to_string(),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if !self.seen_data {
            self.event.clear();
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        let event = SseEvent {
            event: std::mem::take(&mut self.event),
            data,
            id: self.id.clone(),
        };
        self.seen_data = false;
        Some(event)
    }

    fn reset_event(&mut self) {
        self.data.clear();
        self.event.clear();
        self.seen_data = false;
    }
}
