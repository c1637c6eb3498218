//! Synthesis model selection for Quorum
//!
//! Pure, in-memory scoring of candidate models plus query-type detection.
//! The selector is a passive service: only the pipeline driver feeds it
//! outcomes, at stage completion.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod analysis;
pub mod selector;

pub use analysis::{QueryType, detect_query_type};
pub use selector::{ModelSelector, ModelStats};
