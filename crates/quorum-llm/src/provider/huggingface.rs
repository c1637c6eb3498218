//! HuggingFace Inference API adapter

use std::time::Duration;

use async_trait::async_trait;
use quorum_core::ProviderId;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::{Generation, Provider, map_error_response, map_transport};
use crate::error::LlmError;

/// Default HuggingFace Inference API base URL
const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// HuggingFace Inference API provider
pub struct HuggingFaceProvider {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout_seconds: u64,
}

impl HuggingFaceProvider {
    /// Create from provider configuration
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(config: &quorum_config::ProviderConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));
        let timeout_seconds = config.timeout_seconds();

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| LlmError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout_seconds,
        })
    }

    fn model_url(&self, model: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{model}")
    }

    async fn send(&self, model: &str, inputs: String, max_new_tokens: u32) -> Result<Value, LlmError> {
        let request = InferenceRequest {
            inputs,
            parameters: Parameters {
                max_new_tokens,
                temperature: 0.7,
                do_sample: true,
                return_full_text: false,
            },
        };

        let mut builder = self.client.post(self.model_url(model)).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport(ProviderId::Huggingface, &e, self.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(map_error_response(ProviderId::Huggingface, model, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Huggingface
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError> {
        // Chat-tuned models expect the vendor's instruction-turn format
        let lower = model.to_lowercase();
        let inputs = if lower.contains("llama") || lower.contains("mistral") {
            format!("<s>[INST] {prompt} [/INST]")
        } else {
            prompt.to_owned()
        };

        let value = self.send(model, inputs, 1000).await?;
        let text = extract_generated_text(&value)
            .ok_or_else(|| LlmError::MalformedResponse("no generated_text in response".to_owned()))?;

        Ok(Generation { text })
    }

    async fn probe(&self, model: &str) -> Result<(), LlmError> {
        self.send(model, "ping".to_owned(), 1).await.map(|_| ())
    }
}

/// Pull the generated text out of the API's variable response shapes
fn extract_generated_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => match items.first()? {
            Value::Object(map) => map.get("generated_text")?.as_str().map(str::to_owned),
            Value::String(s) => Some(s.clone()),
            _ => None,
        },
        Value::Object(map) => map.get("generated_text")?.as_str().map(str::to_owned),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest {
    inputs: String,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
struct Parameters {
    max_new_tokens: u32,
    temperature: f64,
    do_sample: bool,
    return_full_text: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_array_of_objects() {
        let value = serde_json::json!([{"generated_text": "hello"}]);
        assert_eq!(extract_generated_text(&value).unwrap(), "hello");
    }

    #[test]
    fn extracts_from_array_of_strings() {
        let value = serde_json::json!(["hello"]);
        assert_eq!(extract_generated_text(&value).unwrap(), "hello");
    }

    #[test]
    fn extracts_from_object() {
        let value = serde_json::json!({"generated_text": "hello"});
        assert_eq!(extract_generated_text(&value).unwrap(), "hello");
    }

    #[test]
    fn rejects_unexpected_shape() {
        assert!(extract_generated_text(&serde_json::json!(42)).is_none());
    }
}
