//! Producers: one task per event stream, each pushing what it reads onto the store's queue.

use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, header};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use super::LogKind;
use crate::{api::endpoint, cfg::Config, sse::SseDecoder};

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamBody {
    /// The data of one message event, as sent.
    Message(String),
    /// The connection failed or dropped. The stream keeps trying unless the server refused it.
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    /// The store generation the stream was opened in. Events from older generations are stale.
    pub generation: u64,
    pub kind: LogKind,
    pub body: StreamBody,
}

/// Where to connect and as whom.
#[derive(Clone, Debug, Default)]
pub struct StreamTarget {
    /// Overrides the configured base URL.
    pub base: Option<Url>,
    pub token: Option<String>,
}

/// An open subscription. Closing it stops the producer task; dropping it does too. A handle whose
/// stream was rejected by the server stays in place until closed, so the subscription is not
/// reopened behind the caller's back.
#[derive(Debug)]
pub struct StreamHandle {
    kind: LogKind,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn new(kind: LogKind, task: JoinHandle<()>) -> Self {
        StreamHandle {
            kind,
            task: Some(task),
        }
    }

    /// A handle with no task behind it, for sources that feed the queue some other way.
    pub fn detached(kind: LogKind) -> Self {
        StreamHandle { kind, task: None }
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(kind = %self.kind, "stream closed");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Something that can open one stream of each [LogKind].
pub trait StreamSource: Send + Sync {
    fn open(
        &self,
        kind: LogKind,
        generation: u64,
        target: &StreamTarget,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamHandle>;
}

/// Reads the backend's SSE endpoints over HTTP.
#[derive(Clone, Debug)]
pub struct SseSource {
    client: Client,
    base: Url,
    retry: Duration,
}

impl SseSource {
    pub fn new(config: &Config) -> Result<SseSource> {
        // No overall timeout: these connections are meant to stay open.
        let client = Client::builder()
            .user_agent(concat!("ccpanel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(SseSource {
            client,
            base: config.base_url()?,
            retry: config.sse_retry,
        })
    }

    pub fn stream_url(&self, kind: LogKind, target: &StreamTarget) -> Url {
        let base = target.base.as_ref().unwrap_or(&self.base);
        let mut url = endpoint(base, kind.stream_path());
        if let Some(token) = target.token.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

impl StreamSource for SseSource {
    fn open(
        &self,
        kind: LogKind,
        generation: u64,
        target: &StreamTarget,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamHandle> {
        let url = self.stream_url(kind, target);
        let client = self.client.clone();
        let retry = self.retry;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow!("event streams need a tokio runtime"))?;
        info!(%kind, %url, "opening event stream");
        let task = runtime.spawn(async move {
            let mut retry = retry;
            loop {
                let result = read_stream(&client, &url, kind, generation, &events, &mut retry).await;
                let (reason, reconnect) = match result {
                    Ok(ReadOutcome::Closed) => ("stream ended".to_string(), true),
                    Ok(ReadOutcome::ConsumerGone) => break,
                    Ok(ReadOutcome::Rejected(reason)) => (reason, false),
                    Err(e) => (e.to_string(), true),
                };
                warn!(%kind, reconnect, "event stream interrupted: {reason}");
                let event = StreamEvent {
                    generation,
                    kind,
                    body: StreamBody::Error(reason),
                };
                if events.send(event).await.is_err() || !reconnect {
                    break;
                }
                tokio::time::sleep(retry).await;
                debug!(%kind, "reconnecting event stream");
            }
        });
        Ok(StreamHandle::new(kind, task))
    }
}

enum ReadOutcome {
    Closed,
    ConsumerGone,
    /// The server answered, but not with an event stream. Not retried.
    Rejected(String),
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM))
}

async fn read_stream(
    client: &Client,
    url: &Url,
    kind: LogKind,
    generation: u64,
    events: &mpsc::Sender<StreamEvent>,
    retry: &mut Duration,
) -> Result<ReadOutcome> {
    let response = client
        .get(url.clone())
        .header(header::ACCEPT, EVENT_STREAM)
        .header(header::CACHE_CONTROL, "no-cache")
        .send()
        .await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Ok(ReadOutcome::Rejected(format!("HTTP {}", status.as_u16())));
    }
    if !is_event_stream(&response) {
        return Ok(ReadOutcome::Rejected(format!("not an event stream ({url})")));
    }
    debug!(%kind, status = %response.status(), "event stream connected");

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in decoder.feed(&chunk) {
            if !event.is_message() {
                continue;
            }
            let event = StreamEvent {
                generation,
                kind,
                body: StreamBody::Message(event.data),
            };
            if events.send(event).await.is_err() {
                return Ok(ReadOutcome::ConsumerGone);
            }
        }
        if let Some(r) = decoder.retry() {
            *retry = r;
        }
    }
    decoder.finish();
    Ok(ReadOutcome::Closed)
}
