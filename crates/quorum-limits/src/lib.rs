//! Outbound throttling for Quorum
//!
//! A per-endpoint adaptive rate limiter and the rate-limited-provider
//! fallback manager. Both are process-wide singletons shared by every
//! pipeline run; all state is safe under concurrent access.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod fallback;
pub mod rate;

pub use fallback::FallbackManager;
pub use rate::{EndpointStats, RateLimiter, RatePermit};
