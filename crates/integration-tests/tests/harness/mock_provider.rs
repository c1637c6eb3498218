//! Mock provider backend for integration tests
//!
//! One in-process server speaking the OpenAI, Anthropic, and Google wire
//! formats with per-model scriptable behavior (canned text, failures,
//! rate limits, latency) and a concurrency high-water mark.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Scripted behavior for one model
pub struct ModelScript {
    /// Canned response text
    pub response: String,
    /// Fail this many requests before succeeding
    pub fail_remaining: AtomicU32,
    /// Status returned while failing
    pub fail_status: u16,
    /// Delay before answering
    pub delay: Option<Duration>,
}

impl ModelScript {
    pub fn respond(text: &str) -> Self {
        Self {
            response: text.to_owned(),
            fail_remaining: AtomicU32::new(0),
            fail_status: 500,
            delay: None,
        }
    }

    pub fn failing(text: &str, failures: u32, status: u16) -> Self {
        Self {
            response: text.to_owned(),
            fail_remaining: AtomicU32::new(failures),
            fail_status: status,
            delay: None,
        }
    }

    pub fn slow(text: &str, delay: Duration) -> Self {
        Self {
            response: text.to_owned(),
            fail_remaining: AtomicU32::new(0),
            fail_status: 500,
            delay: Some(delay),
        }
    }
}

pub struct MockState {
    scripts: DashMap<String, ModelScript>,
    request_count: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

/// Mock provider server
pub struct MockProviders {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

impl MockProviders {
    /// Start the mock server on an ephemeral port
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            scripts: DashMap::new(),
            request_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_openai))
            .route("/v1/messages", routing::post(handle_anthropic))
            .route("/v1beta/models/{model_action}", routing::post(handle_google))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Script a model's behavior
    pub fn script(&self, model: &str, script: ModelScript) {
        self.state.scripts.insert(model.to_owned(), script);
    }

    /// Base URL for OpenAI-format and Anthropic-format providers
    pub fn v1_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Base URL for the Google-format provider
    pub fn v1beta_url(&self) -> String {
        format!("http://{}/v1beta", self.addr)
    }

    /// Total requests observed
    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    /// Highest number of simultaneous in-flight requests observed
    pub fn max_in_flight(&self) -> u32 {
        self.state.max_in_flight.load(Ordering::Relaxed)
    }

    /// A TOML config snippet wiring all three providers at this mock,
    /// with fast retry policies suitable for tests
    pub fn provider_config(&self) -> String {
        let retry = "max_attempts = 2\ninitial_delay_seconds = 0.05\nmax_delay_seconds = 0.1";
        format!(
            r#"
            [providers.openai]
            type = "openai"
            base_url = "{v1}"
            timeout_seconds = 2
            [providers.openai.retry]
            {retry}

            [providers.anthropic]
            type = "anthropic"
            base_url = "{v1}"
            timeout_seconds = 2
            [providers.anthropic.retry]
            {retry}

            [providers.google]
            type = "google"
            base_url = "{v1beta}"
            timeout_seconds = 2
            [providers.google.retry]
            {retry}
            "#,
            v1 = self.v1_url(),
            v1beta = self.v1beta_url(),
        )
    }
}

impl Drop for MockProviders {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Resolve the scripted outcome for a model
///
/// Returns the text to answer with, or the failure status to emit.
async fn scripted_outcome(state: &MockState, model: &str) -> Result<String, StatusCode> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let (delay, outcome) = state.scripts.get(model).map_or_else(
        || (None, Ok(format!("Mock answer from {model} covering the question in detail."))),
        |script| {
            let remaining = script.fail_remaining.load(Ordering::SeqCst);
            let outcome = if remaining > 0 {
                script.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                Err(StatusCode::from_u16(script.fail_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            } else {
                Ok(script.response.clone())
            };
            (script.delay, outcome)
        },
    );

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    outcome
}

fn rate_limit_response(status: StatusCode) -> Response {
    let body = serde_json::json!({ "error": { "message": "rate limit exceeded", "type": "rate_limit_error" } });
    (status, [("retry-after", "60")], Json(body)).into_response()
}

async fn handle_openai(
    State(state): State<Arc<MockState>>,
    Json(request): Json<serde_json::Value>,
) -> Response {
    let model = request["model"].as_str().unwrap_or("unknown").to_owned();

    match scripted_outcome(&state, &model).await {
        Ok(text) => Json(serde_json::json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 0,
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
        }))
        .into_response(),
        Err(status) if status == StatusCode::TOO_MANY_REQUESTS => rate_limit_response(status),
        Err(status) => (status, "mock failure").into_response(),
    }
}

async fn handle_anthropic(
    State(state): State<Arc<MockState>>,
    Json(request): Json<serde_json::Value>,
) -> Response {
    let model = request["model"].as_str().unwrap_or("unknown").to_owned();

    match scripted_outcome(&state, &model).await {
        Ok(text) => Json(serde_json::json!({
            "id": "msg_mock",
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [{ "type": "text", "text": text }],
            "stop_reason": "end_turn"
        }))
        .into_response(),
        Err(status) if status == StatusCode::TOO_MANY_REQUESTS => rate_limit_response(status),
        Err(status) => (status, "mock failure").into_response(),
    }
}

async fn handle_google(
    State(state): State<Arc<MockState>>,
    Path(model_action): Path<String>,
) -> Response {
    let model = model_action
        .split_once(':')
        .map_or(model_action.as_str(), |(model, _)| model)
        .to_owned();

    match scripted_outcome(&state, &model).await {
        Ok(text) => Json(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        }))
        .into_response(),
        Err(status) if status == StatusCode::TOO_MANY_REQUESTS => rate_limit_response(status),
        Err(status) => (status, "mock failure").into_response(),
    }
}
