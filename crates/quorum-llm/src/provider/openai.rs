//! OpenAI chat completions adapter

use std::time::Duration;

use async_trait::async_trait;
use quorum_core::ProviderId;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Generation, Provider, map_error_response, map_transport};
use crate::error::LlmError;

/// Default OpenAI API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat completions provider
pub struct OpenAiProvider {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout_seconds: u64,
}

impl OpenAiProvider {
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

    fn completions_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    async fn send(&self, request: &ChatRequest<'_>, model: &str) -> Result<ChatResponse, LlmError> {
        let mut builder = self.client.post(self.completions_url()).json(request);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport(ProviderId::Openai, &e, self.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(map_error_response(ProviderId::Openai, model, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Openai
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: None,
        };

        let parsed = self.send(&request, model).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("response carried no choices".to_owned()))?;

        Ok(Generation { text })
    }

    async fn probe(&self, model: &str) -> Result<(), LlmError> {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage { role: "user", content: "ping" }],
            max_tokens: Some(1),
        };
        self.send(&request, model).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}
