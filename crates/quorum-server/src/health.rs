//! Service health endpoint

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    providers: Vec<quorum_orchestrator::ProviderMetricsSnapshot>,
    models: Vec<quorum_orchestrator::ModelHealthReport>,
    selector: Vec<quorum_orchestrator::ModelStats>,
}

/// Handle `GET /api/health`
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let providers = state.orchestrator.provider_reports();
    let models = state.orchestrator.model_health();
    let selector = state.orchestrator.selector_stats();

    let status = if providers.iter().any(|p| p.circuit_state == "open") {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        providers,
        models,
        selector,
    })
    .into_response()
}
