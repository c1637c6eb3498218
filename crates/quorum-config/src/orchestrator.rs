use std::path::PathBuf;

use serde::Deserialize;

/// Pipeline gating, timeouts, and degrade policy
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Minimum healthy models required to run the pipeline
    #[serde(default = "default_minimum_models")]
    pub minimum_models_required: usize,
    /// Providers that must all be represented among the selected models
    #[serde(default = "default_required_providers")]
    pub required_providers: Vec<String>,
    /// Allow degraded single-model operation when the minimum is not met
    #[serde(default)]
    pub enable_single_model_fallback: bool,
    /// Per-model attempt timeout for the initial response stage, seconds
    #[serde(default = "default_initial_timeout")]
    pub initial_response_timeout_seconds: u64,
    /// Per-model attempt timeout for the peer review stage, seconds
    #[serde(default = "default_peer_review_timeout")]
    pub peer_review_timeout_seconds: u64,
    /// Per-attempt timeout for the synthesis call, seconds
    #[serde(default = "default_synthesis_timeout")]
    pub ultra_synthesis_timeout_seconds: u64,
    /// Group timeout across a stage's concurrent calls, seconds
    #[serde(default = "default_group_timeout")]
    pub concurrent_execution_timeout_seconds: u64,
    /// Upper bound on concurrent model calls within a stage
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Token budget for combined peer answers inside built prompts
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Peer review calls the same model that produced the initial answer
    #[serde(default = "default_true")]
    pub peer_review_same_model: bool,
    /// Extra synthesis candidates considered beyond the requested models
    #[serde(default = "default_synthesis_candidates")]
    pub synthesis_candidates: Vec<String>,
    /// Word count per `synthesis_chunk` stream event
    #[serde(default = "default_chunk_words")]
    pub synthesis_chunk_words: usize,
    /// Directory for optional pipeline output dumps
    #[serde(default)]
    pub save_outputs_dir: Option<PathBuf>,
    /// Produce stubbed model responses instead of live calls
    #[serde(default)]
    pub stub_responses: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            minimum_models_required: default_minimum_models(),
            required_providers: default_required_providers(),
            enable_single_model_fallback: false,
            initial_response_timeout_seconds: default_initial_timeout(),
            peer_review_timeout_seconds: default_peer_review_timeout(),
            ultra_synthesis_timeout_seconds: default_synthesis_timeout(),
            concurrent_execution_timeout_seconds: default_group_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            max_context_tokens: default_max_context_tokens(),
            peer_review_same_model: true,
            synthesis_candidates: default_synthesis_candidates(),
            synthesis_chunk_words: default_chunk_words(),
            save_outputs_dir: None,
            stub_responses: false,
        }
    }
}

const fn default_minimum_models() -> usize {
    3
}

fn default_required_providers() -> Vec<String> {
    vec!["openai".to_owned(), "anthropic".to_owned(), "google".to_owned()]
}

const fn default_initial_timeout() -> u64 {
    30
}

const fn default_peer_review_timeout() -> u64 {
    90
}

const fn default_synthesis_timeout() -> u64 {
    60
}

const fn default_group_timeout() -> u64 {
    70
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_max_context_tokens() -> usize {
    6000
}

const fn default_true() -> bool {
    true
}

fn default_synthesis_candidates() -> Vec<String> {
    vec!["claude-3-5-sonnet-20241022".to_owned()]
}

const fn default_chunk_words() -> usize {
    40
}
