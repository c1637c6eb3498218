//! SSE streaming over the HTTP surface

mod harness;

use harness::mock_provider::MockProviders;
use harness::{big3, test_config};
use quorum_server::Server;
use tokio_util::sync::CancellationToken;

const QUERY: &str = "What are the benefits of renewable energy?";

/// Start the server against mocks, returning its base URL and shutdown
async fn start_server(mock: &MockProviders, extra: &str) -> (String, CancellationToken) {
    let mut config = test_config(mock, extra);
    config.server.listen_address = Some("127.0.0.1:0".parse().unwrap());

    let server = Server::new(config).unwrap();
    let router = server.into_router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_clone.cancelled().await })
            .await
            .ok();
    });

    (format!("http://{addr}"), shutdown)
}

fn parse_sse(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

#[tokio::test]
async fn stream_events_are_ordered_and_complete() {
    let mock = MockProviders::start().await.unwrap();
    let (base, _shutdown) = start_server(&mock, "").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/orchestrate/stream"))
        .json(&serde_json::json!({ "query": QUERY, "models": big3() }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers().clone();
    assert!(
        headers["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert!(headers.contains_key("x-correlation-id"));

    let body = response.text().await.unwrap();
    let events = parse_sse(&body);
    assert!(!events.is_empty());

    // Strictly increasing sequence with no gaps
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"].as_u64().unwrap(), i as u64 + 1);
    }

    let names: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
    assert_eq!(names.iter().filter(|&&n| n == "pipeline_started").count(), 1);
    assert_eq!(names.iter().filter(|&&n| n == "pipeline_completed").count(), 1);
    assert_eq!(names.iter().filter(|&&n| n == "model_started").count(), 3);
    assert_eq!(names.iter().filter(|&&n| n == "model_response").count(), 3);
    assert_eq!(names.iter().filter(|&&n| n == "synthesis_completed").count(), 1);
    assert!(names.iter().filter(|&&n| n == "synthesis_chunk").count() >= 1);

    // Chunks come before synthesis_completed
    let completed_at = names.iter().position(|n| *n == "synthesis_completed").unwrap();
    let last_chunk = names.iter().rposition(|n| *n == "synthesis_chunk").unwrap();
    assert!(last_chunk < completed_at);

    // Every event carries an ISO-8601 timestamp
    for event in &events {
        assert!(event["timestamp"].as_str().unwrap().contains('T'));
    }
}

#[tokio::test]
async fn orchestrate_returns_formatted_result_and_echoes_correlation() {
    let mock = MockProviders::start().await.unwrap();
    let (base, _shutdown) = start_server(&mock, "").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/orchestrate"))
        .header("x-correlation-id", "it-fixed-id")
        .json(&serde_json::json!({ "query": QUERY, "models": big3() }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-correlation-id"], "it-fixed-id");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["correlation_id"], "it-fixed-id");
    assert!(!body["synthesis"].as_str().unwrap().is_empty());
    assert_eq!(body["pipeline_summary"]["success"], true);
    assert_eq!(body["pipeline_summary"]["stages_completed"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn service_unavailable_maps_to_503_payload() {
    let mock = MockProviders::start().await.unwrap();
    let (base, _shutdown) = start_server(&mock, "").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/orchestrate"))
        .json(&serde_json::json!({ "query": QUERY, "models": ["gpt-4"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["details"]["models_required"], 3);
    assert!(
        body["details"]["missing_providers"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "anthropic")
    );
}

#[tokio::test]
async fn health_endpoint_reports_provider_state() {
    let mock = MockProviders::start().await.unwrap();
    let (base, _shutdown) = start_server(&mock, "").await;

    let client = reqwest::Client::new();
    let response = client.get(format!("{base}/api/health")).send().await.unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let mock = MockProviders::start().await.unwrap();
    let (base, _shutdown) = start_server(&mock, "").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api/orchestrate"))
        .json(&serde_json::json!({ "query": "  " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}
