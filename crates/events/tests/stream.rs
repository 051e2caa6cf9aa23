//! Integration tests for the per-connection event stream.

use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use lumen_events::{BrokerConfig, ClientStream, EventBroker, StreamItem, StreamOptions};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Next SSE frame from a response body, as `(field, value)` pairs.
async fn next_fields(body: &mut Body) -> Vec<(String, String)> {
    let frame = body.frame().await.unwrap().unwrap();
    let data = frame.into_data().unwrap();
    let text = std::str::from_utf8(&data).unwrap();
    assert!(text.ends_with("\n\n"), "one complete frame per chunk: {text:?}");
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (field, value) = line.split_once(':').unwrap();
            (field.to_string(), value.strip_prefix(' ').unwrap_or(value).to_string())
        })
        .collect()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(f, _)| f == name).map(|(_, v)| v.as_str())
}

fn event(item: Option<StreamItem>) -> lumen_events::OutboundEvent {
    match item {
        Some(StreamItem::Event(event)) => event,
        other => panic!("expected an event, got {other:?}"),
    }
}

// ---- Test: wire format and heartbeat ----

#[tokio::test(start_paused = true)]
async fn sse_body_writes_opening_frames_then_pings_when_idle() {
    let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
    let options = StreamOptions {
        heartbeat: Duration::from_secs(25),
        retry_ms: 10_000,
    };
    let stream = ClientStream::connect(&broker, "c1", options, CancellationToken::new())
        .await
        .unwrap();
    let mut body = stream.into_sse().into_response().into_body();

    let connected = next_fields(&mut body).await;
    assert_eq!(field(&connected, "event"), Some("connected"));
    let data: serde_json::Value = serde_json::from_str(field(&connected, "data").unwrap()).unwrap();
    assert_eq!(data["clientId"], "c1");

    let retry = next_fields(&mut body).await;
    assert_eq!(field(&retry, "retry"), Some("10000"));

    let started = tokio::time::Instant::now();
    let ping = next_fields(&mut body).await;
    assert_eq!(field(&ping, "event"), Some("ping"));
    assert_eq!(field(&ping, "data"), Some("{}"));
    assert!(started.elapsed() >= Duration::from_secs(25));

    broker.broadcast("job-completed", json!({"jobId": "j1"})).unwrap();
    let frame = next_fields(&mut body).await;
    assert_eq!(field(&frame, "event"), Some("job-completed"));
    assert_eq!(field(&frame, "data"), Some(r#"{"jobId":"j1"}"#));
}

// ---- Test: broker events are forwarded immediately ----

#[tokio::test]
async fn broadcast_events_flow_through_stream() {
    let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
    let mut stream = ClientStream::connect(&broker, "c1", StreamOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(event(stream.next_item().await).event, "connected");
    assert_eq!(
        stream.next_item().await,
        Some(StreamItem::Retry(Duration::from_millis(10_000)))
    );

    broker
        .broadcast("job-completed", json!({"jobId": "j1", "type": "image_process"}))
        .unwrap();
    let completed = event(stream.next_item().await);
    assert_eq!(completed.event, "job-completed");
    assert_eq!(completed.data, json!({"jobId": "j1", "type": "image_process"}));
}

// ---- Test: disconnect unregisters exactly once ----

#[tokio::test]
async fn dropping_stream_unregisters_client() {
    let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
    let stream = ClientStream::connect(&broker, "c1", StreamOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let _other = broker.register("c2").await.unwrap();
    assert_eq!(broker.client_count(), 2);

    drop(stream.into_sse());

    let mut clients = broker.watch_clients();
    clients
        .wait_for(|ids| ids == &["c2".to_string()])
        .await
        .unwrap();
    assert_eq!(broker.client_ids(), vec!["c2".to_string()]);
}

// ---- Test: replaced connection ends ----

#[tokio::test]
async fn stream_ends_when_id_is_taken_over() {
    let (broker, _handle) = EventBroker::spawn(BrokerConfig::default(), CancellationToken::new());
    let mut old = ClientStream::connect(&broker, "c1", StreamOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    old.next_item().await.unwrap();
    old.next_item().await.unwrap();

    let mut new = ClientStream::connect(&broker, "c1", StreamOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert!(old.next_item().await.is_none());
    drop(old);

    // The old guard's unregister must leave the new connection in place.
    new.next_item().await.unwrap();
    new.next_item().await.unwrap();
    broker.broadcast("hello", json!({})).unwrap();
    assert_eq!(event(new.next_item().await).event, "hello");
    assert_eq!(broker.client_count(), 1);
}
