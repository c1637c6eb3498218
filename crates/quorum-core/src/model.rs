//! Model identity rules
//!
//! Provider inference from model names, the model-name allow-list applied
//! at the pipeline entry, and frontend alias mapping.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum accepted model-name length; longer names are dropped
const MAX_MODEL_NAME_LEN: usize = 100;

/// The provider an orchestrated model belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderId {
    Openai,
    Anthropic,
    Google,
    Huggingface,
    Unknown,
}

impl ProviderId {
    /// Derive the provider from a model name
    ///
    /// Pure naming rule: `gpt-*`/`o1*` are OpenAI, `claude*` Anthropic,
    /// `gemini*` Google, and `org/model` identifiers HuggingFace.
    pub fn infer(model: &str) -> Self {
        if model.starts_with("gpt") || model.starts_with("o1") {
            Self::Openai
        } else if model.starts_with("claude") {
            Self::Anthropic
        } else if model.starts_with("gemini") {
            Self::Google
        } else if model.contains('/') {
            Self::Huggingface
        } else {
            Self::Unknown
        }
    }
}

/// Allow-list of accepted model-name shapes
fn allowed_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // OpenAI
            r"^gpt-[34](\.[0-9])?(-turbo)?(-instruct)?$",
            r"^gpt-4o(-mini)?$",
            r"^o1(-preview|-mini)?$",
            // Anthropic
            r"^claude-3(-5)?-(sonnet|haiku|opus)(-\d{8})?$",
            // Google
            r"^gemini-(1\.5-)?(pro|flash)(-exp)?$",
            r"^gemini-2\.0-flash-exp$",
            // HuggingFace org/model identifiers
            r"^[a-zA-Z0-9_-]+/[a-zA-Z0-9_.-]+$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("model allow-list patterns are valid"))
        .collect()
    })
}

/// Validate and sanitize a model list
///
/// Drops overlong names and anything not matching the allow-list. Order is
/// preserved and duplicates removed.
pub fn sanitize_models<S: AsRef<str>>(models: &[S]) -> Vec<String> {
    let mut validated = Vec::new();

    for model in models {
        let model = model.as_ref();
        if model.len() > MAX_MODEL_NAME_LEN {
            tracing::warn!(length = model.len(), "model name too long, skipping");
            continue;
        }

        if allowed_patterns().iter().any(|p| p.is_match(model)) {
            if !validated.iter().any(|v| v == model) {
                validated.push(model.to_owned());
            }
        } else {
            tracing::warn!(model, "model name rejected by allow-list, skipping");
        }
    }

    validated
}

/// Map a frontend alias to the canonical model id
///
/// Unknown names pass through unchanged.
pub fn canonical_model(name: &str) -> &str {
    match name {
        "gpt4o" => "gpt-4o",
        "gpt4turbo" => "gpt-4-turbo",
        "claude37" | "claude-3-sonnet" => "claude-3-5-sonnet-20241022",
        "claude3opus" => "claude-3-opus",
        "gemini15" | "gemini-pro" => "gemini-1.5-pro",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_inference() {
        assert_eq!(ProviderId::infer("gpt-4"), ProviderId::Openai);
        assert_eq!(ProviderId::infer("o1-preview"), ProviderId::Openai);
        assert_eq!(ProviderId::infer("claude-3-5-sonnet-20241022"), ProviderId::Anthropic);
        assert_eq!(ProviderId::infer("gemini-1.5-flash"), ProviderId::Google);
        assert_eq!(ProviderId::infer("meta-llama/Llama-2-7b-chat-hf"), ProviderId::Huggingface);
        assert_eq!(ProviderId::infer("mystery-model"), ProviderId::Unknown);
    }

    #[test]
    fn provider_display_is_lowercase() {
        assert_eq!(ProviderId::Openai.to_string(), "openai");
        assert_eq!(ProviderId::Huggingface.to_string(), "huggingface");
    }

    #[test]
    fn sanitize_accepts_known_shapes() {
        let models = ["gpt-4", "claude-3-5-sonnet-20241022", "gemini-1.5-flash"];
        assert_eq!(sanitize_models(&models).len(), 3);
    }

    #[test]
    fn sanitize_drops_invalid_names() {
        let models = ["gpt-4", "rm -rf /", "; DROP TABLE models", "claude-9000"];
        assert_eq!(sanitize_models(&models), vec!["gpt-4".to_owned()]);
    }

    #[test]
    fn sanitize_drops_overlong_names() {
        let long = format!("gpt-4{}", "x".repeat(200));
        assert!(sanitize_models(&[long]).is_empty());
    }

    #[test]
    fn sanitize_dedupes_preserving_order() {
        let models = ["gpt-4", "gemini-1.5-flash", "gpt-4"];
        assert_eq!(sanitize_models(&models), vec!["gpt-4", "gemini-1.5-flash"]);
    }

    #[test]
    fn alias_mapping() {
        assert_eq!(canonical_model("gpt4o"), "gpt-4o");
        assert_eq!(canonical_model("gemini15"), "gemini-1.5-pro");
        assert_eq!(canonical_model("gpt-4"), "gpt-4");
    }
}
