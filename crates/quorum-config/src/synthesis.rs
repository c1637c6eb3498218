use std::path::PathBuf;

use serde::Deserialize;

/// Enhanced synthesis features
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesisConfig {
    /// Query-type-aware prompts, smart selection, annotated output
    #[serde(default = "default_true")]
    pub enhanced: bool,
    /// JSON file persisting selector metrics across runs
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
    /// Attach confidence annotations to the synthesis output
    #[serde(default = "default_true")]
    pub include_confidence: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enhanced: true,
            metrics_path: default_metrics_path(),
            include_confidence: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("model_performance_metrics.json")
}
