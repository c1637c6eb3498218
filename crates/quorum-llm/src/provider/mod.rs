//! Provider trait and adapter implementations

pub mod anthropic;
pub mod google;
pub mod huggingface;
pub mod openai;

use async_trait::async_trait;
use quorum_core::ProviderId;

use crate::error::LlmError;

/// A completed generation from a provider
#[derive(Debug, Clone)]
pub struct Generation {
    /// The generated text
    pub text: String,
}

/// One external LLM API behind the uniform contract
///
/// Adapters translate provider-native payloads, never retry, and never
/// block beyond their single HTTP round-trip.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which provider this adapter talks to
    fn id(&self) -> ProviderId;

    /// Send one prompt and return the generated text
    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError>;

    /// Minimal, cheap request used by health probes
    async fn probe(&self, model: &str) -> Result<(), LlmError>;
}

/// Map a reqwest failure to the uniform error taxonomy
pub(crate) fn map_transport(provider: ProviderId, error: &reqwest::Error, timeout_seconds: u64) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout { seconds: timeout_seconds }
    } else {
        tracing::error!(%provider, error = %error, "upstream request failed");
        LlmError::Transport(error.to_string())
    }
}

/// Map a non-success HTTP response to the uniform error taxonomy
///
/// Consumes the response body for diagnostics; the `retry-after` header is
/// read before the body.
pub(crate) async fn map_error_response(
    provider: ProviderId,
    model: &str,
    response: reqwest::Response,
) -> LlmError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let body = response.text().await.unwrap_or_default();

    tracing::warn!(%provider, model, status = %status, "upstream returned error");

    match status.as_u16() {
        401 | 403 => LlmError::Auth { provider },
        404 => LlmError::NotFound { model: model.to_owned() },
        429 => LlmError::RateLimited { provider, retry_after },
        400 => LlmError::BadRequest(truncate(&body, 200)),
        // HuggingFace returns 503 while a model is loading
        503 if provider == ProviderId::Huggingface => LlmError::Loading { model: model.to_owned() },
        _ => LlmError::Transport(format!("provider returned {status}: {}", truncate(&body, 200))),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_owned()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_passthrough() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld with a fairly long tail";
        let out = truncate(text, 10);
        assert!(out.ends_with('…'));
    }
}
