//! Provider composition root
//!
//! Builds the adapter → resilient → metered stack for every configured
//! provider and exposes a single `generate(model, prompt)` entry point
//! that routes by model name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quorum_config::{Config, ProviderKind};
use quorum_core::{ProviderId, canonical_model};
use secrecy::ExposeSecret;

use crate::circuit::CircuitBreaker;
use crate::error::LlmError;
use crate::health::HealthCache;
use crate::metered::{MeteredClient, MeteredGeneration};
use crate::provider::Provider;
use crate::resilient::{ProviderMetricsSnapshot, ResilientClient};

/// Response text substituted for live calls in stub mode
const STUB_RESPONSE: &str = "Stubbed model response generated for offline operation. It stands in \
for real provider output so the full pipeline shape, peer review flow, and synthesis stage can be \
exercised end to end without any external API access or configured credentials.";

struct ProviderEntry {
    client: MeteredClient,
    has_credentials: bool,
    default_models: Vec<String>,
}

/// Uniform access to every configured provider
pub struct LlmGateway {
    providers: HashMap<ProviderId, ProviderEntry>,
    health: Arc<HealthCache>,
    stub_responses: bool,
}

impl LlmGateway {
    /// Build the full provider stack from configuration
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let mut providers = HashMap::new();

        for (name, provider_config) in &config.providers {
            let adapter: Arc<dyn Provider> = match provider_config.kind {
                ProviderKind::Openai => {
                    Arc::new(crate::provider::openai::OpenAiProvider::new(provider_config)?)
                }
                ProviderKind::Anthropic => {
                    Arc::new(crate::provider::anthropic::AnthropicProvider::new(provider_config)?)
                }
                ProviderKind::Google => {
                    Arc::new(crate::provider::google::GoogleProvider::new(provider_config)?)
                }
                ProviderKind::Huggingface => {
                    Arc::new(crate::provider::huggingface::HuggingFaceProvider::new(provider_config)?)
                }
            };

            let id = adapter.id();
            let circuit = Arc::new(CircuitBreaker::new(
                id,
                provider_config
                    .circuit_breaker
                    .clone()
                    .unwrap_or_else(|| provider_config.kind.default_circuit_breaker()),
            ));
            let retry = provider_config
                .retry
                .clone()
                .unwrap_or_else(|| provider_config.kind.default_retry());
            let timeout = Duration::from_secs(provider_config.timeout_seconds());

            // A keyless provider pointed at the stock endpoint cannot work;
            // a custom base URL may be a self-hosted or test endpoint
            let has_credentials = provider_config
                .api_key
                .as_ref()
                .is_some_and(|k| !k.expose_secret().is_empty())
                || provider_config.base_url.is_some();

            tracing::info!(provider = %id, name = %name, "provider initialized");

            providers.insert(
                id,
                ProviderEntry {
                    client: MeteredClient::new(ResilientClient::new(adapter, circuit, timeout, retry)),
                    has_credentials,
                    default_models: provider_config.default_models.clone(),
                },
            );
        }

        Ok(Self {
            providers,
            health: Arc::new(HealthCache::new()),
            stub_responses: config.orchestrator.stub_responses,
        })
    }

    /// Providers with usable credentials
    pub fn configured_providers(&self) -> Vec<ProviderId> {
        self.providers
            .iter()
            .filter(|(_, entry)| entry.has_credentials)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether a model's provider is configured and usable
    pub fn supports(&self, model: &str) -> bool {
        let id = ProviderId::infer(canonical_model(model));
        self.providers.get(&id).is_some_and(|entry| entry.has_credentials)
    }

    /// Generate through the resilient, metered stack for the model's provider
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<MeteredGeneration, LlmError> {
        let model = canonical_model(model);
        let provider = ProviderId::infer(model);

        let entry = self
            .providers
            .get(&provider)
            .filter(|entry| entry.has_credentials)
            .ok_or(LlmError::MissingApiKey { provider })?;

        if self.stub_responses {
            let text = format!("{STUB_RESPONSE} (model: {model})");
            let output_tokens = crate::metered::estimate_tokens(&text);
            return Ok(MeteredGeneration {
                text,
                input_tokens: crate::metered::estimate_tokens(prompt),
                output_tokens,
                cost: 0.0,
                duration_ms: 0.0,
            });
        }

        match entry.client.generate(model, prompt).await {
            // Some orgs only have gpt-4o; fall back once when gpt-4 is absent
            Err(LlmError::NotFound { .. }) if model == "gpt-4" => {
                tracing::info!("gpt-4 not available, retrying with gpt-4o");
                entry.client.generate("gpt-4o", prompt).await
            }
            other => other,
        }
    }

    /// Probe a model's health through the shared cache
    pub async fn probe(&self, model: &str) -> bool {
        let model = canonical_model(model);
        let provider = ProviderId::infer(model);

        let Some(entry) = self.providers.get(&provider).filter(|e| e.has_credentials) else {
            return false;
        };

        if self.stub_responses {
            return true;
        }

        self.health.probe(model, entry.client.inner()).await
    }

    /// Default model pool, diversified by interleaving providers
    pub fn default_models(&self) -> Vec<String> {
        let lists: Vec<&Vec<String>> = self
            .providers
            .values()
            .filter(|entry| entry.has_credentials && !entry.default_models.is_empty())
            .map(|entry| &entry.default_models)
            .collect();

        let longest = lists.iter().map(|l| l.len()).max().unwrap_or(0);
        let mut models = Vec::new();
        for i in 0..longest {
            for list in &lists {
                if let Some(model) = list.get(i) {
                    if !models.contains(model) {
                        models.push(model.clone());
                    }
                }
            }
        }
        models
    }

    /// Count a cancelled call against the model's provider circuit
    pub fn record_cancellation(&self, model: &str) {
        let provider = ProviderId::infer(canonical_model(model));
        if let Some(entry) = self.providers.get(&provider) {
            entry.client.inner().record_cancellation();
        }
    }

    /// The shared health cache
    pub fn health(&self) -> &Arc<HealthCache> {
        &self.health
    }

    /// Per-provider resilience counters
    pub fn metrics(&self) -> Vec<ProviderMetricsSnapshot> {
        self.providers
            .values()
            .map(|entry| entry.client.inner().metrics_snapshot())
            .collect()
    }
}
