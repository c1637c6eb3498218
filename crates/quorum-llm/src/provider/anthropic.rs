//! Anthropic Messages API adapter

use std::time::Duration;

use async_trait::async_trait;
use quorum_core::ProviderId;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Generation, Provider, map_error_response, map_transport};
use crate::error::LlmError;

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Token ceiling sent with generation requests
const MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API provider
///
/// The key travels only in the `x-api-key` header, never in the URL.
pub struct AnthropicProvider {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    timeout_seconds: u64,
}

impl AnthropicProvider {
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

    fn messages_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/messages")
    }

    async fn send(&self, request: &MessagesRequest<'_>, model: &str) -> Result<MessagesResponse, LlmError> {
        let mut builder = self
            .client
            .post(self.messages_url())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);

        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_transport(ProviderId::Anthropic, &e, self.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(map_error_response(ProviderId::Anthropic, model, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError> {
        let request = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message { role: "user", content: prompt }],
        };

        let parsed = self.send(&request, model).await?;
        let text = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| LlmError::MalformedResponse("response carried no content".to_owned()))?;

        Ok(Generation { text })
    }

    async fn probe(&self, model: &str) -> Result<(), LlmError> {
        let request = MessagesRequest {
            model,
            max_tokens: 1,
            messages: vec![Message { role: "user", content: "ping" }],
        };
        self.send(&request, model).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}
