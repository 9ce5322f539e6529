//! HTTP tests: the router served on an ephemeral port, driven with reqwest.

mod common;

use std::sync::Arc;

use common::{build, textbook_index, TOPIC_ROS2};
use grounded_qa::pipeline::Pipeline;
use grounded_qa::server::router;
use serde_json::{json, Value};

async fn spawn_server(pipeline: Arc<Pipeline>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(pipeline)).await.ok();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_query_endpoint() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "What is ROS 2?", "session_id": "web-1", "top_k": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["session_id"], "web-1");
    assert_eq!(body["outcome"]["is_valid"], true);
    assert!(body["outcome"]["confidence"].as_f64().unwrap() >= 0.9);
    assert_eq!(body["result"]["chunks"][0]["id"], "ros2-intro-0");
    assert!(body["outcome"]["relevant_sources"]
        .as_array()
        .unwrap()
        .contains(&json!("https://example.com/ros2-intro")));

    assert_eq!(t.pipeline.sessions().history("web-1", 10).len(), 1);
}

#[tokio::test]
async fn test_query_reuses_selection_only_when_asked() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    for body in [
        json!({ "query": "What does this do?", "selected_text": "<robot> URDF", "session_id": "web-2" }),
        json!({ "query": "And this?", "session_id": "web-2", "reuse_selection": true }),
        json!({ "query": "And this?", "session_id": "web-2" }),
    ] {
        let resp = client
            .post(format!("{}/query", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let seen = t.embedder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            "What does this do? Context: <robot> URDF",
            "And this? Context: <robot> URDF",
            "And this?",
        ]
    );
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "query must not be empty");
}

#[tokio::test]
async fn test_validate_endpoint_omits_chunks() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/validate", base))
        .json(&json!({ "query": "Explain URDF fundamentals" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["is_valid"], true);
    assert!(body.get("chunks").is_none());
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn test_unavailable_index_is_503() {
    let t = build(textbook_index().failing_on(TOPIC_ROS2));
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/validate", base))
        .json(&json!({ "query": "What is ROS 2?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "retrieval_unavailable");
}

#[tokio::test]
async fn test_validation_run_endpoint() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/validation/run", base))
        .json(&json!({ "tolerance": 0.1, "verbose": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["verdict"], "PASSED");
    assert_eq!(body["total"], 3);
    assert_eq!(body["cases"].as_array().unwrap().len(), 3);
    assert_eq!(body["cases"][0]["status"], "passed");

    let resp = client
        .post(format!("{}/validation/run", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert!(body["cases"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_run_rejects_negative_tolerance() {
    let t = build(textbook_index());
    let base = spawn_server(t.pipeline.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/validation/run", base))
        .json(&json!({ "tolerance": -1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
