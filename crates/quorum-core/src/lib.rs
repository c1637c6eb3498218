//! Shared core types for Quorum
//!
//! Correlation id plumbing and model/provider identity rules used by
//! every other crate in the workspace.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod correlation;
pub mod model;

pub use correlation::{CorrelationId, current_correlation, with_correlation};
pub use model::{ProviderId, canonical_model, sanitize_models};
