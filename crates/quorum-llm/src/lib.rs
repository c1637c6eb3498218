//! Provider access for Quorum
//!
//! A uniform `generate(prompt) -> text` contract over OpenAI, Anthropic,
//! Google, and HuggingFace, layered with resilience (timeout, bounded
//! retry, circuit breaking), call telemetry (tokens, cost, spans), and a
//! process-wide health cache.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod circuit;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metered;
pub mod provider;
pub mod resilient;

pub use circuit::{CircuitBreaker, CircuitState};
pub use error::LlmError;
pub use gateway::LlmGateway;
pub use health::HealthCache;
pub use metered::{MeteredGeneration, estimate_tokens};
pub use provider::{Generation, Provider};
pub use resilient::{ProviderMetricsSnapshot, ResilientClient};
