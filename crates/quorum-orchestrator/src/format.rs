//! Output formatting
//!
//! Pure transformation of a pipeline result into a client-facing response
//! shape: the synthesis, optional confidence-annotated variant, the
//! intermediate stage responses, a run summary, and a human-readable full
//! document. Also scores cross-model consensus over shared concepts.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::types::PipelineResult;

const SECTION_SEPARATOR: &str = "\n================================================================================\n";

/// Confidence assigned to a synthesis claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
    Uncertain,
}

/// A sentence-level claim and its detected confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfidence {
    pub text: String,
    pub level: ConfidenceLevel,
}

/// Per-model response summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub text: String,
    pub word_count: usize,
    pub preview: String,
}

/// Run summary for the response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub stages_completed: Vec<String>,
    pub models_used: Vec<String>,
    pub success: bool,
}

/// Consensus measurement across model responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusIndicators {
    /// Fraction of distinct concepts shared by at least two models
    pub consensus_score: f64,
    /// Concepts mentioned by more than half of the models
    pub high_consensus_topics: Vec<String>,
}

/// Client-facing response shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedOutput {
    pub synthesis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_enhanced: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_model: Option<String>,
    pub initial_responses: IndexMap<String, ResponseSummary>,
    pub peer_review_responses: IndexMap<String, ResponseSummary>,
    pub pipeline_summary: PipelineSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Vec<ClaimConfidence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusIndicators>,
    pub full_document: String,
}

/// Formats pipeline results for clients
pub struct OutputFormatter {
    include_confidence: bool,
}

impl OutputFormatter {
    pub const fn new(include_confidence: bool) -> Self {
        Self { include_confidence }
    }

    /// Shape a pipeline result into the response envelope
    pub fn format(&self, result: &PipelineResult) -> FormattedOutput {
        let synthesis_text = result
            .synthesis()
            .map(|stage| stage.synthesis.clone())
            .unwrap_or_default();
        let synthesis_model = result.synthesis().map(|stage| stage.model_used.clone());

        let initial_responses = result
            .initial()
            .map(|stage| summarize(&stage.responses))
            .unwrap_or_default();
        let peer_review_responses = result
            .peer_review()
            .map(|stage| summarize(&stage.revised_responses))
            .unwrap_or_default();

        let (synthesis_enhanced, confidence, consensus) = if self.include_confidence && !synthesis_text.is_empty() {
            let claims = annotate_confidence(&synthesis_text);
            let enhanced = render_enhanced(&claims);
            let consensus = result
                .peer_review()
                .map(|stage| consensus_indicators(&stage.revised_responses));
            (Some(enhanced), Some(claims), consensus)
        } else {
            (None, None, None)
        };

        let pipeline_summary = summary_for(result);
        let full_document = full_document(result, &synthesis_text, &pipeline_summary);

        FormattedOutput {
            synthesis: synthesis_text,
            synthesis_enhanced,
            synthesis_model,
            initial_responses,
            peer_review_responses,
            pipeline_summary,
            confidence,
            consensus,
            full_document,
        }
    }
}

fn summarize(responses: &IndexMap<String, String>) -> IndexMap<String, ResponseSummary> {
    responses
        .iter()
        .map(|(model, text)| {
            (
                model.clone(),
                ResponseSummary {
                    text: text.clone(),
                    word_count: text.split_whitespace().count(),
                    preview: preview(text, 150),
                },
            )
        })
        .collect()
}

fn preview(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_owned();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn summary_for(result: &PipelineResult) -> PipelineSummary {
    let stages_completed: Vec<String> = result
        .stages
        .iter()
        .filter(|(_, record)| record.error.is_none())
        .map(|(name, _)| name.clone())
        .collect();

    let mut models_used: Vec<String> = Vec::new();
    if let Some(initial) = result.initial() {
        for model in &initial.successful_models {
            if !models_used.contains(model) {
                models_used.push(model.clone());
            }
        }
    }
    if let Some(synthesis) = result.synthesis() {
        if !models_used.contains(&synthesis.model_used) {
            models_used.push(synthesis.model_used.clone());
        }
    }

    PipelineSummary {
        stages_completed,
        models_used,
        success: result.success(),
    }
}

/// Agreement/disagreement phrase sets per confidence level
fn confidence_patterns() -> &'static [(ConfidenceLevel, regex::Regex)] {
    static PATTERNS: OnceLock<Vec<(ConfidenceLevel, regex::Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                ConfidenceLevel::High,
                r"all models agree|unanimous|strong consensus|consistent across|universally",
            ),
            (
                ConfidenceLevel::Moderate,
                r"most models|majority|generally|moderate consensus|broadly",
            ),
            (
                ConfidenceLevel::Low,
                r"some models|varies|mixed|partial|only one model",
            ),
            (
                ConfidenceLevel::Uncertain,
                r"unclear|uncertain|cannot determine|conflicting|disputed",
            ),
        ]
        .into_iter()
        .map(|(level, pattern)| {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("confidence patterns are valid");
            (level, regex)
        })
        .collect()
    })
}

/// Assign per-sentence confidence from explicit agreement phrases
pub fn annotate_confidence(synthesis: &str) -> Vec<ClaimConfidence> {
    synthesis
        .split_terminator(". ")
        .filter(|sentence| !sentence.trim().is_empty())
        .map(|sentence| {
            let level = confidence_patterns()
                .iter()
                .find(|(_, regex)| regex.is_match(sentence))
                .map_or(ConfidenceLevel::Moderate, |(level, _)| *level);
            ClaimConfidence {
                text: sentence.trim().to_owned(),
                level,
            }
        })
        .collect()
}

fn render_enhanced(claims: &[ClaimConfidence]) -> String {
    claims
        .iter()
        .map(|claim| {
            let marker = match claim.level {
                ConfidenceLevel::High => "[High confidence]",
                ConfidenceLevel::Moderate => "[Moderate confidence]",
                ConfidenceLevel::Low => "[Low confidence]",
                ConfidenceLevel::Uncertain => "[Uncertain]",
            };
            format!("{} {marker}", claim.text)
        })
        .collect::<Vec<_>>()
        .join(". ")
}

/// Measure concept overlap across model responses
///
/// Concepts are distinct words longer than four characters; the score is
/// the fraction shared by at least two models.
pub fn consensus_indicators(responses: &IndexMap<String, String>) -> ConsensusIndicators {
    let concept_sets: Vec<HashSet<String>> = responses
        .values()
        .map(|text| {
            text.to_lowercase()
                .split_whitespace()
                .filter(|word| word.len() > 4)
                .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_owned())
                .filter(|word| !word.is_empty())
                .collect()
        })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for set in &concept_sets {
        for concept in set {
            *counts.entry(concept).or_insert(0) += 1;
        }
    }

    if counts.is_empty() {
        return ConsensusIndicators {
            consensus_score: 0.0,
            high_consensus_topics: Vec::new(),
        };
    }

    let shared = counts.values().filter(|&&n| n >= 2).count();
    let consensus_score = shared as f64 / counts.len() as f64;

    let threshold = responses.len().div_ceil(2).max(2);
    let mut high: Vec<String> = counts
        .iter()
        .filter(|&(_, &n)| n >= threshold)
        .map(|(concept, _)| (*concept).to_owned())
        .collect();
    high.sort();
    high.truncate(5);

    ConsensusIndicators {
        consensus_score,
        high_consensus_topics: high,
    }
}

fn full_document(result: &PipelineResult, synthesis: &str, summary: &PipelineSummary) -> String {
    let mut doc = String::new();

    doc.push_str("# Ultra Synthesis Result\n");
    doc.push_str(SECTION_SEPARATOR);
    doc.push_str(synthesis);
    doc.push_str(SECTION_SEPARATOR);

    if let Some(initial) = result.initial() {
        doc.push_str("## Initial Responses\n\n");
        for (model, text) in &initial.responses {
            doc.push_str(&format!("### {model}\n{text}\n\n"));
        }
        doc.push_str(SECTION_SEPARATOR);
    }

    if let Some(peer) = result.peer_review() {
        if peer.skipped.is_none() {
            doc.push_str("## Peer-Reviewed Revisions\n\n");
            for (model, text) in &peer.revised_responses {
                doc.push_str(&format!("### {model}\n{text}\n\n"));
            }
            doc.push_str(SECTION_SEPARATOR);
        }
    }

    doc.push_str(&format!(
        "Stages completed: {}. Models used: {}.\n",
        summary.stages_completed.join(", "),
        summary.models_used.join(", ")
    ));

    doc
}

#[cfg(test)]
mod tests {
    use crate::types::{
        InitialStage, PeerReviewStage, PerformanceMetrics, StageName, StageOutput, StageRecord,
        SynthesisStage, SynthesisStrategy,
    };

    use super::*;

    fn result_with_synthesis(text: &str) -> PipelineResult {
        let mut responses = IndexMap::new();
        responses.insert("gpt-4".to_owned(), "solar power reduces emissions significantly".to_owned());
        responses.insert("claude-3-opus".to_owned(), "solar power reduces costs and emissions".to_owned());

        let mut stages = IndexMap::new();
        stages.insert(
            StageName::InitialResponse.to_string(),
            StageRecord {
                output: Some(StageOutput::Initial(InitialStage {
                    prompt: "q".to_owned(),
                    responses: responses.clone(),
                    successful_models: vec!["gpt-4".to_owned(), "claude-3-opus".to_owned()],
                    attempted_models: vec!["gpt-4".to_owned(), "claude-3-opus".to_owned()],
                    errors: IndexMap::new(),
                })),
                error: None,
                duration_seconds: 0.1,
            },
        );
        stages.insert(
            StageName::PeerReviewAndRevision.to_string(),
            StageRecord {
                output: Some(StageOutput::PeerReview(PeerReviewStage {
                    original_responses: responses.clone(),
                    revised_responses: responses,
                    successful_models: vec!["gpt-4".to_owned(), "claude-3-opus".to_owned()],
                    skipped: None,
                    revision_count: 2,
                })),
                error: None,
                duration_seconds: 0.1,
            },
        );
        stages.insert(
            StageName::UltraSynthesis.to_string(),
            StageRecord {
                output: Some(StageOutput::Synthesis(SynthesisStage {
                    synthesis: text.to_owned(),
                    model_used: "gemini-1.5-pro".to_owned(),
                    strategy: SynthesisStrategy::NonParticipant,
                    participants: vec!["gpt-4".to_owned(), "claude-3-opus".to_owned()],
                    non_participants: vec!["gemini-1.5-pro".to_owned()],
                    source_models: vec!["gpt-4".to_owned(), "claude-3-opus".to_owned()],
                })),
                error: None,
                duration_seconds: 0.1,
            },
        );

        PipelineResult {
            correlation_id: "test".to_owned(),
            stages,
            performance: PerformanceMetrics::default(),
            cached: false,
        }
    }

    #[test]
    fn formats_all_sections() {
        let result = result_with_synthesis("All models agree on the core benefits. Costs are falling.");
        let formatted = OutputFormatter::new(true).format(&result);

        assert!(!formatted.synthesis.is_empty());
        assert_eq!(formatted.synthesis_model.as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(formatted.initial_responses.len(), 2);
        assert_eq!(formatted.peer_review_responses.len(), 2);
        assert!(formatted.pipeline_summary.success);
        assert_eq!(formatted.pipeline_summary.stages_completed.len(), 3);
        assert!(formatted.full_document.contains("## Initial Responses"));
    }

    #[test]
    fn confidence_markers_follow_agreement_phrases() {
        let result = result_with_synthesis(
            "All models agree solar is effective. Some models note storage limits. The outlook is unclear.",
        );
        let formatted = OutputFormatter::new(true).format(&result);
        let claims = formatted.confidence.unwrap();

        assert_eq!(claims[0].level, ConfidenceLevel::High);
        assert_eq!(claims[1].level, ConfidenceLevel::Low);
        assert_eq!(claims[2].level, ConfidenceLevel::Uncertain);

        let enhanced = formatted.synthesis_enhanced.unwrap();
        assert!(enhanced.contains("[High confidence]"));
        assert!(enhanced.contains("[Low confidence]"));
    }

    #[test]
    fn confidence_can_be_disabled() {
        let result = result_with_synthesis("Plain synthesis text.");
        let formatted = OutputFormatter::new(false).format(&result);
        assert!(formatted.confidence.is_none());
        assert!(formatted.synthesis_enhanced.is_none());
    }

    #[test]
    fn consensus_scores_shared_concepts() {
        let result = result_with_synthesis("Some synthesis.");
        let formatted = OutputFormatter::new(true).format(&result);
        let consensus = formatted.consensus.unwrap();

        // "solar"/"power"/"reduces"/"emissions" are shared between the
        // two model answers
        assert!(consensus.consensus_score > 0.0);
        assert!(consensus.high_consensus_topics.contains(&"solar".to_owned()));
    }

    #[test]
    fn summary_includes_synthesis_model() {
        let result = result_with_synthesis("text");
        let formatted = OutputFormatter::new(false).format(&result);
        assert!(formatted.pipeline_summary.models_used.contains(&"gemini-1.5-pro".to_owned()));
    }
}
