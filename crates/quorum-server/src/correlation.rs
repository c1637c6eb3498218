//! Correlation-id middleware
//!
//! Accepts an `x-correlation-id` request header or mints a fresh id, makes
//! it available to handlers via request extensions, and echoes it on the
//! response.

use axum::extract::Request;
use axum::http::{HeaderValue, header::HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use quorum_core::CorrelationId;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map_or_else(CorrelationId::generate, CorrelationId::new);

    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }

    response
}
