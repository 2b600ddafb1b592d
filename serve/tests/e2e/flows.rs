//! Non-stream HTTP scenarios: health, echo, sequential, parallel, errors.

use serde_json::{json, Value};

use super::common::spawn_server;

#[tokio::test]
async fn health_reports_ok() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn openapi_lists_every_flow() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{base}/openapi.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let paths = body["paths"].as_object().unwrap();
    for flow in ["/demo_echo", "/inc3", "/lens", "/count", "/slow"] {
        assert!(paths.contains_key(flow), "missing {flow} in schema");
    }
}

/// **Scenario**: EchoOp over HTTP.
#[tokio::test]
async fn echo_over_http() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/demo_echo"))
        .json(&json!({"text": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["answer"], "echo: hi");
    assert_eq!(body["messages"], json!([]));
}

/// **Scenario**: Sequential composition — `inc3` leaves n == 3.
#[tokio::test]
async fn sequential_increments() {
    let base = spawn_server().await;
    let body: Value = reqwest::Client::new()
        .post(format!("{base}/inc3"))
        .json(&json!({"n": 0}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["n"], 3);
}

/// **Scenario**: Parallel aggregation — both lengths appear in the response.
#[tokio::test]
async fn parallel_lengths() {
    let base = spawn_server().await;
    let body: Value = reqwest::Client::new()
        .post(format!("{base}/lens"))
        .json(&json!({"text_1": "ab", "text_2": "xyz"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["len_1"], 2);
    assert_eq!(body["len_2"], 3);
}

#[tokio::test]
async fn unknown_flow_is_404() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/no_such_flow"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unknown_flow");
}

/// **Scenario**: request-level deadline produces a timeout status.
#[tokio::test]
async fn slow_flow_times_out() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/slow"))
        .json(&json!({"timeout_ms": 100}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 408);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "timeout");
}

#[tokio::test]
async fn non_object_body_is_rejected() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/demo_echo"))
        .json(&json!([1, 2, 3]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "input_validation");
}

#[tokio::test]
async fn cors_is_permissive() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/demo_echo"))
        .header("Origin", "http://anywhere.example")
        .json(&json!({"text": "x"}))
        .send()
        .await
        .unwrap();
    let allow_origin = response
        .headers()
        .get("access-control-allow-origin")
        .expect("allow-origin header");
    assert_eq!(allow_origin, "*");
}
