mod streams;

use std::{sync::Arc, time::Duration};

use ccpanel::{
    api::ApiClient,
    cfg::Config,
    logs::{Ingested, LogKind, LogStore, SseSource},
};
use httpmock::MockServer;

pub fn config_for(server: &MockServer) -> Config {
    Config {
        api_base: server.base_url(),
        sse_retry: Duration::from_secs(30),
        ..Default::default()
    }
}

pub fn log_store(config: &Config) -> LogStore {
    let backend = Arc::new(ApiClient::new(config).unwrap());
    let source = Arc::new(SseSource::new(config).unwrap());
    LogStore::new(backend, source, config)
}

/// Apply stream events until `count` lines have arrived, ignoring stream errors.
pub async fn collect_lines(store: &mut LogStore, count: usize) -> Vec<Ingested> {
    let mut lines = Vec::new();
    while lines.len() < count {
        let next = tokio::time::timeout(Duration::from_secs(10), store.next_ingested())
            .await
            .expect("timed out waiting for stream events")
            .expect("event queue closed");
        if matches!(next, Ingested::Line { .. }) {
            lines.push(next);
        }
    }
    lines
}

/// Apply stream events until `count` stream errors have arrived, returning the failed kinds.
pub async fn collect_failures(store: &mut LogStore, count: usize) -> Vec<LogKind> {
    let mut kinds = Vec::new();
    while kinds.len() < count {
        let next = tokio::time::timeout(Duration::from_secs(10), store.next_ingested())
            .await
            .expect("timed out waiting for stream errors")
            .expect("event queue closed");
        if let Ingested::Failed { kind, .. } = next {
            kinds.push(kind);
        }
    }
    kinds
}
