use indexmap::IndexMap;
use serde::Deserialize;

/// Rate-limit pattern detection over provider responses
///
/// Some providers report quota exhaustion inside a 200 body. The pattern
/// sets drift with provider behavior, so they are configuration rather
/// than code; the defaults below match current observed responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionConfig {
    /// Whether body scanning for rate-limit patterns is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether detected rate limits are retried (vs failed immediately)
    #[serde(default = "default_true")]
    pub retry_enabled: bool,
    /// Per-provider regex pattern sets, case-insensitive
    #[serde(default = "default_patterns")]
    pub patterns: IndexMap<String, Vec<String>>,
    /// Per-provider backoff delay multipliers
    #[serde(default = "default_multipliers")]
    pub delay_multipliers: IndexMap<String, f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_enabled: true,
            patterns: default_patterns(),
            delay_multipliers: default_multipliers(),
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_patterns() -> IndexMap<String, Vec<String>> {
    let mut patterns = IndexMap::new();
    patterns.insert(
        "openai".to_owned(),
        vec![
            r"rate.?limit".to_owned(),
            "429".to_owned(),
            "too many requests".to_owned(),
            "quota exceeded".to_owned(),
            "rate_limit_exceeded".to_owned(),
        ],
    );
    patterns.insert(
        "anthropic".to_owned(),
        vec![
            r"rate.?limit".to_owned(),
            "429".to_owned(),
            "too many requests".to_owned(),
            "quota exceeded".to_owned(),
        ],
    );
    patterns.insert(
        "google".to_owned(),
        vec![
            r"quota.?exceed".to_owned(),
            r"rate.?limit".to_owned(),
            "429".to_owned(),
            "RESOURCE_EXHAUSTED".to_owned(),
        ],
    );
    patterns.insert(
        "huggingface".to_owned(),
        vec![
            r"rate.?limit".to_owned(),
            "too many requests".to_owned(),
            "429".to_owned(),
            "503.*loading".to_owned(),
        ],
    );
    patterns
}

fn default_multipliers() -> IndexMap<String, f64> {
    let mut multipliers = IndexMap::new();
    // OpenAI needs longer waits; HuggingFace may be loading a model
    multipliers.insert("openai".to_owned(), 1.5);
    multipliers.insert("anthropic".to_owned(), 1.2);
    multipliers.insert("google".to_owned(), 1.0);
    multipliers.insert("huggingface".to_owned(), 2.0);
    multipliers
}
