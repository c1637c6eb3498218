use serde::Deserialize;

/// Bounded retry policy with exponential backoff and jitter
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: f64,
    /// Ceiling on any single retry delay, seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    /// Exponential backoff base
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    /// Jitter factor applied as `delay × (1 ± jitter)`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_seconds: default_initial_delay(),
            max_delay_seconds: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_delay() -> f64 {
    1.0
}

const fn default_max_delay() -> f64 {
    30.0
}

const fn default_exponential_base() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.1
}
