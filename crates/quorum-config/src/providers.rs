use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::retry::RetryConfig;

/// Configuration for a single LLM provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider protocol type
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API key for authentication
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Per-call HTTP timeout in seconds; overrides the kind default
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Models offered as pipeline defaults when the caller selects none
    #[serde(default)]
    pub default_models: Vec<String>,
    /// Retry policy override for this provider
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Circuit breaker tuning override for this provider
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ProviderConfig {
    /// Effective per-call timeout, falling back to the kind default
    pub const fn timeout_seconds(&self) -> u64 {
        match self.timeout_seconds {
            Some(secs) => secs,
            None => self.kind.default_timeout_seconds(),
        }
    }
}

/// Supported LLM provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI chat completions API
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Generative Language API
    Google,
    /// HuggingFace Inference API
    Huggingface,
}

impl ProviderKind {
    /// Vendor-tuned per-call timeout defaults
    pub const fn default_timeout_seconds(self) -> u64 {
        match self {
            // Claude can take longer on complex prompts; Gemini is fast
            Self::Openai | Self::Huggingface => 30,
            Self::Anthropic => 45,
            Self::Google => 25,
        }
    }

    /// Vendor-tuned retry defaults
    pub fn default_retry(self) -> RetryConfig {
        match self {
            Self::Openai => RetryConfig {
                max_attempts: 3,
                initial_delay_seconds: 1.0,
                max_delay_seconds: 10.0,
                ..RetryConfig::default()
            },
            Self::Anthropic => RetryConfig {
                max_attempts: 3,
                initial_delay_seconds: 2.0,
                max_delay_seconds: 20.0,
                ..RetryConfig::default()
            },
            Self::Google => RetryConfig {
                max_attempts: 4,
                initial_delay_seconds: 0.5,
                max_delay_seconds: 15.0,
                ..RetryConfig::default()
            },
            Self::Huggingface => RetryConfig::default(),
        }
    }

    /// Vendor-tuned circuit breaker defaults
    pub const fn default_circuit_breaker(self) -> CircuitBreakerConfig {
        match self {
            Self::Openai | Self::Huggingface => CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                min_calls: 10,
                recovery_seconds: 60,
            },
            Self::Anthropic => CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                min_calls: 10,
                recovery_seconds: 90,
            },
            Self::Google => CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 3,
                min_calls: 10,
                recovery_seconds: 45,
            },
        }
    }
}

/// Circuit breaker tuning for a provider
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures required to trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Minimum observed calls before the breaker may trip
    #[serde(default = "default_min_calls")]
    pub min_calls: u32,
    /// Seconds the breaker stays open before probing
    #[serde(default = "default_recovery_seconds")]
    pub recovery_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            min_calls: default_min_calls(),
            recovery_seconds: default_recovery_seconds(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_min_calls() -> u32 {
    10
}

const fn default_recovery_seconds() -> u64 {
    60
}

/// Outbound rate-limit configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Requests per minute applied to auto-registered endpoints
    #[serde(default = "default_rpm")]
    pub default_rpm: u32,
    /// Optional burst allowance above the per-minute budget
    #[serde(default)]
    pub default_burst: Option<u32>,
    /// Per-endpoint overrides keyed by endpoint name
    #[serde(default)]
    pub endpoints: IndexMap<String, EndpointLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rpm: default_rpm(),
            default_burst: None,
            endpoints: IndexMap::new(),
        }
    }
}

/// Rate limit for one endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointLimit {
    /// Requests per minute
    pub rpm: u32,
    /// Optional burst allowance
    #[serde(default)]
    pub burst: Option<u32>,
}

const fn default_rpm() -> u32 {
    60
}
