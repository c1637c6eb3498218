#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod detection;
mod env;
mod loader;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod server;
pub mod synthesis;
pub mod telemetry;

use indexmap::IndexMap;
use serde::Deserialize;

pub use cache::CacheConfig;
pub use detection::DetectionConfig;
pub use orchestrator::OrchestratorConfig;
pub use providers::{CircuitBreakerConfig, ProviderConfig, ProviderKind, RateLimitConfig};
pub use retry::RetryConfig;
pub use server::ServerConfig;
pub use synthesis::SynthesisConfig;
pub use telemetry::TelemetryConfig;

/// Top-level Quorum configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// LLM provider configurations keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Pipeline gating, timeouts, and degrade policy
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Default retry policy (providers may override)
    #[serde(default)]
    pub retry: RetryConfig,
    /// Rate-limit pattern detection
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Outbound request rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Enhanced synthesis features (query typing, smart selection)
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Pipeline result caching
    #[serde(default)]
    pub cache: CacheConfig,
    /// Telemetry export configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
