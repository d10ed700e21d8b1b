use std::{sync::Arc, time::Duration};

use ccpanel::{
    api::ApiClient,
    experiment::ExperimentStore,
    logs::{Ingested, LogKind},
    types::RunStatus,
};
use httpmock::prelude::*;
use serde_json::json;

use crate::{collect_failures, collect_lines, config_for, log_store};

fn event_stream(body: &str) -> String {
    body.lines().map(|l| format!("data: {l}\n\n")).collect()
}

#[tokio::test]
async fn three_streams_feed_their_buffers() {
    let server = MockServer::start_async().await;
    let tx = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/tx_stream")
                .query_param("token", "jwt");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(event_stream(
                    "{\"tx_hash\":\"0xabcdef1234567890\",\"block_info\":{\"number\":42},\"timestamps\":{}}\noops",
                ));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/node_log_stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(": hello\n\ndata: peer 1 connected\n\n");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/system_log_stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(event_stream("system booted"));
        })
        .await;

    let mut config = config_for(&server);
    config.token = Some("jwt".to_string());
    let mut store = log_store(&config);
    store.start_sse(None).unwrap();
    store.start_sse(None).unwrap();
    assert_eq!(store.live_streams(), 3);

    collect_lines(&mut store, 4).await;
    tx.assert_async().await;

    assert_eq!(store.logs().len(), 4);
    let tx_lines: Vec<&str> = store.kind_logs(LogKind::Tx).iter().collect();
    assert_eq!(tx_lines.len(), 2);
    assert!(tx_lines[0].contains("hash=0xabcd…7890"));
    assert!(tx_lines[0].contains("block=42"));
    assert_eq!(tx_lines[1], "oops");
    assert!(
        store
            .kind_logs(LogKind::Node)
            .back()
            .unwrap()
            .ends_with("NODE peer 1 connected")
    );
    assert!(
        store
            .kind_logs(LogKind::System)
            .back()
            .unwrap()
            .ends_with("SYS  system booted")
    );

    store.reset();
    assert_eq!(store.live_streams(), 0);
    assert!(store.logs().is_empty());
    assert_eq!(store.logs_error(), None);
}

#[tokio::test]
async fn dropped_stream_reports_its_kind() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/tx_stream");
            then.status(500);
        })
        .await;
    for path in ["/node_log_stream", "/system_log_stream"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(": keepalive\n\n");
            })
            .await;
    }

    let mut store = log_store(&config_for(&server));
    store.start_sse(None).unwrap();
    let mut failed = Vec::new();
    while !failed.contains(&LogKind::Tx) {
        let next = tokio::time::timeout(Duration::from_secs(10), store.next_ingested())
            .await
            .expect("timed out waiting for the stream error")
            .expect("event queue closed");
        if let Ingested::Failed { kind, .. } = next {
            failed.push(kind);
        }
    }
    // The other streams stay subscribed.
    assert_eq!(store.live_streams(), 3);
    assert!(store.logs_error().is_some());
}

#[tokio::test]
async fn run_completes_from_the_system_stream() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/start");
            then.status(200).json_body(json!({ "message": "System started" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/system_log_stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(event_stream(
                    "injecting\nAll transactions are completed. Now to shut down.",
                ));
        })
        .await;
    for path in ["/tx_stream", "/node_log_stream"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("");
            })
            .await;
    }

    let config = config_for(&server);
    let mut experiment = ExperimentStore::new(Arc::new(ApiClient::new(&config).unwrap()));
    let mut logs = log_store(&config);
    experiment.start(None).await;
    assert_eq!(experiment.status(), RunStatus::Running);

    logs.start_sse(None).unwrap();
    for ingested in collect_lines(&mut logs, 2).await {
        if let Ingested::Line {
            kind: LogKind::System,
            raw,
            ..
        } = ingested
        {
            experiment.handle_system_log(&raw);
        }
    }
    assert_eq!(experiment.status(), RunStatus::Finished);
    assert_eq!(experiment.system_message(), Some("System self-stopped"));
}

#[tokio::test]
async fn tail_replaces_the_combined_buffer() {
    let server = MockServer::start_async().await;
    let tail = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/logs_tail")
                .query_param("limit", "3");
            then.status(200)
                .json_body(json!({ "lines": ["one", "two", "three"] }));
        })
        .await;

    let mut store = log_store(&config_for(&server));
    store.append_log("stale".to_string());
    store.fetch_logs(Some(3)).await;
    tail.assert_async().await;
    assert_eq!(
        store.logs().to_vec(),
        vec!["one".to_string(), "two".to_string(), "three".to_string()]
    );
}

#[tokio::test]
async fn refused_streams_are_not_retried() {
    let server = MockServer::start_async().await;
    let unauthorized = server
        .mock_async(|when, then| {
            when.method(GET).path("/tx_stream");
            then.status(401).json_body(json!({ "error": "bad token" }));
        })
        .await;
    let wrong_type = server
        .mock_async(|when, then| {
            when.method(GET).path("/node_log_stream");
            then.status(200)
                .header("content-type", "text/plain")
                .body("data: not really\n\n");
        })
        .await;
    let missing = server
        .mock_async(|when, then| {
            when.method(GET).path("/system_log_stream");
            then.status(404);
        })
        .await;

    let mut config = config_for(&server);
    config.sse_retry = Duration::from_millis(20);
    let mut store = log_store(&config);
    store.start_sse(None).unwrap();

    let mut failed = Vec::new();
    while failed.len() < 3 {
        let next = tokio::time::timeout(Duration::from_secs(10), store.next_ingested())
            .await
            .expect("timed out waiting for the stream errors")
            .expect("event queue closed");
        match next {
            Ingested::Failed { kind, .. } => failed.push(kind),
            Ingested::Line { line, .. } => panic!("unexpected line {line:?}"),
        }
    }
    failed.sort();
    assert_eq!(failed, LogKind::ALL.to_vec());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(store.pump().is_empty());
    assert_eq!(unauthorized.hits_async().await, 1);
    assert_eq!(wrong_type.hits_async().await, 1);
    assert_eq!(missing.hits_async().await, 1);

    // The refused subscriptions stay in place until stopped.
    assert_eq!(store.live_streams(), 3);
    store.start_sse(None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(unauthorized.hits_async().await, 1);

    store.stop_sse();
    store.start_sse(None).unwrap();
    collect_failures(&mut store, 3).await;
    assert_eq!(unauthorized.hits_async().await, 2);
}

#[tokio::test]
async fn closed_stream_reconnects() {
    let server = MockServer::start_async().await;
    let node = server
        .mock_async(|when, then| {
            when.method(GET).path("/node_log_stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(event_stream("tick"));
        })
        .await;
    for path in ["/tx_stream", "/system_log_stream"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(204);
            })
            .await;
    }

    let mut config = config_for(&server);
    config.sse_retry = Duration::from_millis(20);
    let mut store = log_store(&config);
    store.start_sse(None).unwrap();

    let lines = collect_lines(&mut store, 3).await;
    assert!(lines.iter().all(|l| matches!(
        l,
        Ingested::Line {
            kind: LogKind::Node,
            ..
        }
    )));
    assert!(node.hits_async().await >= 3);
    assert_eq!(store.kind_logs(LogKind::Node).len(), 3);
    assert!(store.logs_error().is_some());

    // A restart reconnects under the new generation; nothing from before the stop comes through.
    store.stop_sse();
    store.clear_logs();
    store.start_sse(None).unwrap();
    collect_lines(&mut store, 1).await;
    assert_eq!(store.kind_logs(LogKind::Node).len(), 1);
    assert!(store.kind_logs(LogKind::Tx).is_empty());
}

#[tokio::test]
async fn server_retry_overrides_the_default_delay() {
    let server = MockServer::start_async().await;
    let system = server
        .mock_async(|when, then| {
            when.method(GET).path("/system_log_stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("retry: 20\ndata: heartbeat\n\n");
        })
        .await;
    for path in ["/tx_stream", "/node_log_stream"] {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path);
                then.status(204);
            })
            .await;
    }

    // The configured delay alone would outlast the timeout below.
    let config = config_for(&server);
    assert!(config.sse_retry >= Duration::from_secs(30));
    let mut store = log_store(&config);
    store.start_sse(None).unwrap();

    tokio::time::timeout(Duration::from_secs(5), collect_lines(&mut store, 3))
        .await
        .expect("stream did not reconnect at the server's pace");
    assert!(system.hits_async().await >= 3);
}
