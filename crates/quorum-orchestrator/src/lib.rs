//! The Ultra Synthesis pipeline driver
//!
//! Fans a query out to several models, asks each to revise its answer
//! after seeing peers' answers, and synthesizes the revisions through a
//! single non-participant model. Emits typed stream events per run and
//! degrades gracefully when providers fail.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod error;
pub mod events;
pub mod executor;
pub mod format;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod stream;
pub mod types;

pub use error::OrchestratorError;
pub use quorum_llm::ProviderMetricsSnapshot;
pub use quorum_llm::health::HealthStatus as ModelHealthReport;
pub use quorum_selection::ModelStats;
pub use events::{EventBus, EventName, StreamEvent};
pub use format::{FormattedOutput, OutputFormatter};
pub use pipeline::{Orchestrator, RunOptions};
pub use retry::RetryHandler;
pub use types::{
    PipelineOutcome, PipelineResult, ServiceUnavailable, StageName, SynthesisStrategy,
};
