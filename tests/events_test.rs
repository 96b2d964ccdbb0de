//! Integration tests for the SSE events endpoint.

mod common;

use common::TestHarness;
use lc_core::events::{EventPayload, LogSource};

#[tokio::test]
async fn sse_stream_connects() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/api/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let ct = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(ct.contains("text/event-stream"), "expected SSE content-type, got: {ct}");
}

#[tokio::test]
async fn late_joiners_get_recent_log_lines() {
    let (h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let line = lc_core::events::LogBuffer::new(4).push(None, LogSource::Stderr, "frame=42 fps=30");
    h.ctx.event_bus.broadcast(EventPayload::StreamLog { line });

    let mut resp = client
        .get(format!("http://{addr}/api/events?kind=log"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), resp.chunk())
        .await
        .expect("no replayed event")
        .unwrap()
        .unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("\"type\":\"stream_log\""), "unexpected chunk: {text}");
    assert!(text.contains("frame=42 fps=30"));
}
