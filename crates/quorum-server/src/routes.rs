//! Pipeline route handlers

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use quorum_core::CorrelationId;
use quorum_orchestrator::{FormattedOutput, OutputFormatter, PipelineOutcome, RunOptions};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Request body for both orchestration endpoints
#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    /// The user query
    pub query: String,
    /// Requested models; server defaults apply when absent
    #[serde(default)]
    pub models: Option<Vec<String>>,
    /// Persist run artifacts to the configured output directory
    #[serde(default)]
    pub save_outputs: bool,
}

/// Successful orchestration response envelope
#[derive(Debug, Serialize)]
pub struct OrchestrateResponse {
    pub correlation_id: String,
    pub cached: bool,
    pub processing_seconds: f64,
    #[serde(flatten)]
    pub output: FormattedOutput,
}

/// Handle `POST /api/orchestrate`
pub async fn orchestrate(
    State(state): State<AppState>,
    axum::Extension(correlation_id): axum::Extension<CorrelationId>,
    Json(request): Json<OrchestrateRequest>,
) -> Response {
    if request.query.trim().is_empty() {
        let body = serde_json::json!({
            "error": "INVALID_REQUEST",
            "message": "query must not be empty",
        });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let options = RunOptions {
        correlation_id: Some(correlation_id.to_string()),
        save_outputs: request.save_outputs,
        ..RunOptions::default()
    };

    let outcome = state
        .orchestrator
        .run_pipeline(&request.query, &options, request.models)
        .await;

    match outcome {
        PipelineOutcome::Completed(result) => {
            let formatter = OutputFormatter::new(state.include_confidence);
            let response = OrchestrateResponse {
                correlation_id: result.correlation_id.clone(),
                cached: result.cached,
                processing_seconds: result.performance.total_seconds,
                output: formatter.format(&result),
            };
            Json(response).into_response()
        }
        PipelineOutcome::Unavailable(refusal) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(*refusal)).into_response()
        }
    }
}

/// Handle `POST /api/orchestrate/stream`
///
/// Emits the run's events as SSE: each event is one `data:` line carrying
/// the JSON envelope with name, sequence, timestamp, and payload.
pub async fn orchestrate_stream(
    State(state): State<AppState>,
    axum::Extension(correlation_id): axum::Extension<CorrelationId>,
    Json(request): Json<OrchestrateRequest>,
) -> Response {
    let options = RunOptions {
        correlation_id: Some(correlation_id.to_string()),
        save_outputs: request.save_outputs,
        ..RunOptions::default()
    };

    let (run_id, events) =
        state
            .orchestrator
            .stream_pipeline(request.query, options, request.models);

    let sse_stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, std::convert::Infallible>(Event::default().data(data))
    });

    let sse = Sse::new(sse_stream).keep_alive(KeepAlive::default());

    (
        [
            (http::header::CACHE_CONTROL, "no-cache"),
            (http::header::HeaderName::from_static("x-accel-buffering"), "no"),
            (
                http::header::HeaderName::from_static(crate::correlation::CORRELATION_HEADER),
                run_id.as_str(),
            ),
        ],
        sse,
    )
        .into_response()
}
