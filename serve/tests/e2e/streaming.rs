//! SSE scenarios: ordered chunks, single terminal event, error shape.

use serde_json::{json, Value};

use super::common::spawn_server;

/// Splits an SSE body into its `data:` payloads.
fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// **Scenario**: Streaming flow — events `1`, `2`, `3`, then `[DONE]`, in
/// that order, terminal exactly once, nothing after it.
#[tokio::test]
async fn count_stream_in_order_with_single_done() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/count"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let body = response.text().await.unwrap();
    let events = data_lines(&body);
    assert_eq!(events.len(), 4, "three chunks + terminal: {events:?}");
    for (event, expected) in events.iter().take(3).zip(["1", "2", "3"]) {
        let parsed: Value = serde_json::from_str(event).unwrap();
        assert_eq!(parsed["type"], "answer");
        assert_eq!(parsed["content"], expected);
    }
    assert_eq!(events[3], "[DONE]");
    assert_eq!(
        events.iter().filter(|e| e.as_str() == "[DONE]").count(),
        1,
        "terminal sent exactly once"
    );
}

/// **Scenario**: A failing stream flow ends with an error event, then `[DONE]`.
#[tokio::test]
async fn failing_stream_sends_error_then_done() {
    let base = spawn_server().await;
    let body = reqwest::Client::new()
        .post(format!("{base}/boom_stream"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = data_lines(&body);
    assert!(events.len() >= 2, "{events:?}");
    let error_event: Value = serde_json::from_str(&events[events.len() - 2]).unwrap();
    assert_eq!(error_event["type"], "error");
    assert!(error_event["content"].as_str().unwrap().contains("scripted"));
    assert_eq!(events.last().unwrap(), "[DONE]");
}
