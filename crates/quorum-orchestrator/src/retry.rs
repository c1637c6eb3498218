//! Orchestration-level retry with rate-limit pattern detection
//!
//! A layer above the resilient wrapper: even a textual "success" is
//! scanned for provider-specific rate-limit patterns and, when matched,
//! treated as a retryable rate-limit event with provider-weighted delays.

use std::collections::HashMap;
use std::time::Duration;

use quorum_config::{DetectionConfig, RetryConfig};
use quorum_core::ProviderId;
use quorum_llm::{LlmError, MeteredGeneration};
use rand::Rng;
use regex::RegexBuilder;

use crate::error::OrchestratorError;

/// Retry handler applied around whole model attempts
pub struct RetryHandler {
    retry: RetryConfig,
    detection_enabled: bool,
    retry_enabled: bool,
    patterns: HashMap<ProviderId, Vec<regex::Regex>>,
    multipliers: HashMap<ProviderId, f64>,
}

impl RetryHandler {
    /// Compile the configured pattern sets
    pub fn new(retry: RetryConfig, detection: &DetectionConfig) -> Result<Self, OrchestratorError> {
        let mut patterns = HashMap::new();
        for (provider, sources) in &detection.patterns {
            let Ok(id) = provider.parse::<ProviderId>() else {
                tracing::warn!(provider, "ignoring patterns for unknown provider");
                continue;
            };
            let compiled = sources
                .iter()
                .map(|source| {
                    RegexBuilder::new(source)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| OrchestratorError::InvalidPattern {
                            provider: provider.clone(),
                            source: e,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            patterns.insert(id, compiled);
        }

        let multipliers = detection
            .delay_multipliers
            .iter()
            .filter_map(|(provider, multiplier)| {
                provider.parse::<ProviderId>().ok().map(|id| (id, *multiplier))
            })
            .collect();

        Ok(Self {
            retry,
            detection_enabled: detection.enabled,
            retry_enabled: detection.retry_enabled,
            patterns,
            multipliers,
        })
    }

    /// Whether text matches the provider's rate-limit patterns
    pub fn detect_rate_limit(&self, text: &str, provider: ProviderId) -> bool {
        if !self.detection_enabled {
            return false;
        }

        self.patterns
            .get(&provider)
            .is_some_and(|patterns| patterns.iter().any(|p| p.is_match(text)))
    }

    /// Provider-weighted backoff delay for a rate-limited attempt
    fn rate_limit_delay(&self, attempt: u32, provider: ProviderId) -> Duration {
        let base = self.retry.initial_delay_seconds
            * self
                .retry
                .exponential_base
                .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let multiplier = self.multipliers.get(&provider).copied().unwrap_or(1.0);
        let capped = (base * multiplier).min(self.retry.max_delay_seconds);

        // Jitter prevents a thundering herd on shared quota resets
        let spread = capped * 0.1;
        let jittered = capped + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Run a call, retrying rate limits (including body-pattern hits) and
    /// timeouts; other errors pass straight through
    pub async fn execute_with_retry<F, Fut>(
        &self,
        provider: ProviderId,
        model: &str,
        call: F,
    ) -> Result<MeteredGeneration, LlmError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<MeteredGeneration, LlmError>>,
    {
        let mut last_error = LlmError::Other("no attempts made".to_owned());

        for attempt in 0..self.retry.max_attempts {
            match call().await {
                Ok(generation) => {
                    if self.detect_rate_limit(&generation.text, provider) {
                        tracing::info!(%provider, model, "rate limit pattern detected in response body");
                        if !self.retry_enabled {
                            return Err(LlmError::RateLimited { provider, retry_after: None });
                        }
                        last_error = LlmError::RateLimited { provider, retry_after: None };
                    } else {
                        if attempt > 0 {
                            tracing::info!(%provider, model, attempt, "retry succeeded");
                        }
                        return Ok(generation);
                    }
                }
                Err(error @ (LlmError::RateLimited { .. } | LlmError::Timeout { .. })) => {
                    last_error = error;
                }
                // Everything else was already handled by the resilient
                // wrapper; do not multiply retries
                Err(error) => return Err(error),
            }

            if attempt + 1 < self.retry.max_attempts {
                let delay = self.rate_limit_delay(attempt, provider);
                tracing::warn!(
                    %provider,
                    model,
                    attempt = attempt + 1,
                    max_attempts = self.retry.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %last_error,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(%provider, model, error = %last_error, "all orchestration retries failed");
        Err(last_error)
    }

    /// `execute_with_retry` bounded by an overall deadline
    pub async fn execute_with_timeout<F, Fut>(
        &self,
        overall_timeout: Duration,
        provider: ProviderId,
        model: &str,
        call: F,
    ) -> Result<MeteredGeneration, LlmError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<MeteredGeneration, LlmError>>,
    {
        match tokio::time::timeout(overall_timeout, self.execute_with_retry(provider, model, call)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::error!(
                    %provider,
                    model,
                    timeout_secs = overall_timeout.as_secs(),
                    "overall attempt timeout exceeded"
                );
                Err(LlmError::Timeout { seconds: overall_timeout.as_secs() })
            }
        }
    }
}
