//! Pipeline result types
//!
//! Every stage produces a tagged result struct; the run as a whole is an
//! ordered map of stage records plus aggregated performance metrics. The
//! only top-level error shape the pipeline returns is the structured
//! service-unavailable payload.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The three pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    InitialResponse,
    PeerReviewAndRevision,
    UltraSynthesis,
}

/// A model call that did not produce usable text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFailure {
    /// Machine-readable error kind (`timeout`, `rate_limited`, ...)
    pub kind: String,
    pub message: String,
    /// Substitute providers/models when the failure was a rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_suggestion: Option<FallbackSuggestion>,
}

/// Alternative offered when a provider is rate limited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSuggestion {
    pub provider: String,
    pub models: Vec<String>,
    pub message: String,
}

/// Stage 1 output: independent model answers to the raw query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStage {
    pub prompt: String,
    pub responses: IndexMap<String, String>,
    pub successful_models: Vec<String>,
    pub attempted_models: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, ModelFailure>,
}

/// Stage 2 output: answers revised after seeing peers' answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReviewStage {
    pub original_responses: IndexMap<String, String>,
    /// Revised text per model; models whose revision call failed carry
    /// their original answer forward
    pub revised_responses: IndexMap<String, String>,
    pub successful_models: Vec<String>,
    /// Reason the stage was skipped, when it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub revision_count: usize,
}

/// How the synthesis model was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// A model that did not participate in earlier stages
    NonParticipant,
    /// No non-participant was available; a participant synthesized
    ParticipantFallback,
}

/// Stage 3 output: the final integrated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisStage {
    pub synthesis: String,
    pub model_used: String,
    pub strategy: SynthesisStrategy,
    pub participants: Vec<String>,
    pub non_participants: Vec<String>,
    pub source_models: Vec<String>,
}

/// One stage's output, identified by shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutput {
    Initial(InitialStage),
    PeerReview(PeerReviewStage),
    Synthesis(SynthesisStage),
}

/// Record of one stage: output or error, plus duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Aggregated per-run accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_seconds: f64,
    /// Latency per `model/stage` pair, milliseconds
    pub model_latencies_ms: IndexMap<String, f64>,
    /// Token estimates per labelled slice of the run
    pub token_estimates: IndexMap<String, usize>,
    pub total_cost_usd: f64,
}

/// Ordered result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub correlation_id: String,
    /// Stage records keyed by stage name, in execution order
    pub stages: IndexMap<String, StageRecord>,
    pub performance: PerformanceMetrics,
    /// True when this result was served from the cache
    pub cached: bool,
}

impl PipelineResult {
    /// The stage 1 output, when present
    pub fn initial(&self) -> Option<&InitialStage> {
        match self.stages.get(&StageName::InitialResponse.to_string())?.output.as_ref()? {
            StageOutput::Initial(stage) => Some(stage),
            _ => None,
        }
    }

    /// The stage 2 output, when present
    pub fn peer_review(&self) -> Option<&PeerReviewStage> {
        match self
            .stages
            .get(&StageName::PeerReviewAndRevision.to_string())?
            .output
            .as_ref()?
        {
            StageOutput::PeerReview(stage) => Some(stage),
            _ => None,
        }
    }

    /// The stage 3 output, when present
    pub fn synthesis(&self) -> Option<&SynthesisStage> {
        match self.stages.get(&StageName::UltraSynthesis.to_string())?.output.as_ref()? {
            StageOutput::Synthesis(stage) => Some(stage),
            _ => None,
        }
    }

    /// Whether every recorded stage completed without error
    pub fn success(&self) -> bool {
        self.synthesis().is_some() && self.stages.values().all(|record| record.error.is_none())
    }
}

/// Structured refusal returned when gating fails
///
/// This is a value, not an exception: callers receive it as the pipeline
/// outcome and map it to HTTP 503.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUnavailable {
    /// Always `"SERVICE_UNAVAILABLE"`
    pub error: String,
    pub message: String,
    pub details: UnavailableDetails,
}

/// Diagnostic payload of a service-unavailable refusal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableDetails {
    pub models_required: usize,
    pub providers_available: usize,
    pub providers_operational: Vec<String>,
    pub required_providers: Vec<String>,
    pub missing_providers: Vec<String>,
    /// `"unavailable"` (gating) or `"degraded"` (runtime shortage)
    pub service_status: String,
}

impl ServiceUnavailable {
    pub fn new(message: impl Into<String>, details: UnavailableDetails) -> Self {
        Self {
            error: "SERVICE_UNAVAILABLE".to_owned(),
            message: message.into(),
            details,
        }
    }
}

/// Terminal outcome of `run_pipeline`
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(Box<PipelineResult>),
    Unavailable(Box<ServiceUnavailable>),
}

impl PipelineOutcome {
    pub fn result(&self) -> Option<&PipelineResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Unavailable(_) => None,
        }
    }

    pub fn unavailable(&self) -> Option<&ServiceUnavailable> {
        match self {
            Self::Completed(_) => None,
            Self::Unavailable(refusal) => Some(refusal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_serialize_snake_case() {
        assert_eq!(StageName::InitialResponse.to_string(), "initial_response");
        assert_eq!(StageName::PeerReviewAndRevision.to_string(), "peer_review_and_revision");
        assert_eq!(StageName::UltraSynthesis.to_string(), "ultra_synthesis");
    }

    #[test]
    fn service_unavailable_serializes_contract_shape() {
        let refusal = ServiceUnavailable::new(
            "Insufficient healthy models. Require 3.",
            UnavailableDetails {
                models_required: 3,
                providers_available: 2,
                providers_operational: vec!["openai".to_owned(), "anthropic".to_owned()],
                required_providers: vec!["openai".to_owned(), "anthropic".to_owned(), "google".to_owned()],
                missing_providers: vec!["google".to_owned()],
                service_status: "unavailable".to_owned(),
            },
        );

        let json = serde_json::to_value(&refusal).unwrap();
        assert_eq!(json["error"], "SERVICE_UNAVAILABLE");
        assert_eq!(json["details"]["missing_providers"][0], "google");
        assert_eq!(json["details"]["service_status"], "unavailable");
    }

    #[test]
    fn pipeline_result_round_trips_through_json() {
        let mut stages = IndexMap::new();
        stages.insert(
            StageName::UltraSynthesis.to_string(),
            StageRecord {
                output: Some(StageOutput::Synthesis(SynthesisStage {
                    synthesis: "answer".to_owned(),
                    model_used: "gpt-4o".to_owned(),
                    strategy: SynthesisStrategy::NonParticipant,
                    participants: vec!["gpt-4".to_owned()],
                    non_participants: vec!["gpt-4o".to_owned()],
                    source_models: vec!["gpt-4".to_owned()],
                })),
                error: None,
                duration_seconds: 1.25,
            },
        );

        let result = PipelineResult {
            correlation_id: "abc".to_owned(),
            stages,
            performance: PerformanceMetrics::default(),
            cached: false,
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: PipelineResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.synthesis().unwrap().model_used, "gpt-4o");
        assert!(back.success());
    }
}
