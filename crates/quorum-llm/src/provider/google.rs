//! Google Generative Language API adapter

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use quorum_core::ProviderId;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Generation, Provider, map_error_response, map_transport};
use crate::error::LlmError;

/// Default Google Generative Language API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language API provider
///
/// The vendor requires the key as a URL query parameter; it must never
/// appear in logs.
pub struct GoogleProvider {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout_seconds: u64,
}

impl GoogleProvider {
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

    fn generate_url(&self, model: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = format!("{base}/models/{model}:generateContent");
        if let Some(key) = &self.api_key {
            let _ = write!(url, "?key={}", key.expose_secret());
        }
        url
    }

    async fn send(&self, request: &GenerateRequest<'_>, model: &str) -> Result<GenerateResponse, LlmError> {
        let response = self
            .client
            .post(self.generate_url(model))
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport(ProviderId::Google, &e, self.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(map_error_response(ProviderId::Google, model, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: None,
        };

        let parsed = self.send(&request, model).await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| LlmError::MalformedResponse("response carried no candidates".to_owned()))?;

        Ok(Generation { text })
    }

    async fn probe(&self, model: &str) -> Result<(), LlmError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "ping" }],
            }],
            generation_config: Some(GenerationConfig { max_output_tokens: 1 }),
        };
        self.send(&request, model).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}
