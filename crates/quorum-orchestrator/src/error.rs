use thiserror::Error;

/// Errors raised while assembling the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A configured rate-limit detection pattern is not valid regex
    #[error("invalid rate-limit pattern for provider '{provider}': {source}")]
    InvalidPattern {
        provider: String,
        #[source]
        source: regex::Error,
    },

    /// Provider stack construction failed
    #[error("provider initialization failed: {0}")]
    Provider(#[from] quorum_llm::LlmError),
}
