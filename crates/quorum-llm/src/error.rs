use quorum_core::ProviderId;
use thiserror::Error;

/// Errors surfaced by provider calls
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key is configured for the provider
    #[error("no API key configured for {provider}")]
    MissingApiKey { provider: ProviderId },

    /// Provider rejected the credentials (401/403)
    #[error("authentication failed for {provider}")]
    Auth { provider: ProviderId },

    /// Model does not exist or is not accessible (404)
    #[error("model not found: {model}")]
    NotFound { model: String },

    /// Provider rejected the request shape (400)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Provider reported quota exhaustion (429 or body pattern)
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: ProviderId,
        /// Seconds the provider asked us to wait, when advertised
        retry_after: Option<u64>,
    },

    /// The call exceeded its deadline
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Model is warming up (503 during load)
    #[error("model is loading: {model}")]
    Loading { model: String },

    /// Connection failure or 5xx from the provider
    #[error("transport error: {0}")]
    Transport(String),

    /// Response did not match the expected wire shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Circuit breaker is open; the provider was not called
    #[error("circuit open for {provider}")]
    CircuitOpen { provider: ProviderId },

    /// The call was cancelled before completion
    #[error("call cancelled")]
    Cancelled,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether the resilient wrapper should retry this error
    ///
    /// 4xx client errors and malformed responses never retry; timeouts,
    /// transport failures, warm-ups, and rate limits always do.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Transport(_)
                | Self::Loading { .. }
                | Self::RateLimited { .. }
                | Self::Other(_)
        )
    }

    /// Whether this outcome feeds the provider circuit breaker
    ///
    /// A missing key is a local configuration problem, and an open
    /// circuit never reached the provider.
    pub const fn counts_for_circuit(&self) -> bool {
        !matches!(self, Self::MissingApiKey { .. } | Self::CircuitOpen { .. })
    }

    /// Short machine-readable kind tag for stage results and events
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "missing_api_key",
            Self::Auth { .. } => "auth",
            Self::NotFound { .. } => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Loading { .. } => "loading",
            Self::Transport(_) => "transport",
            Self::MalformedResponse(_) => "malformed_response",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }
}
