//! Resilient wrapper around a provider adapter
//!
//! Applies the per-provider timeout, bounded retries with exponential
//! backoff and jitter, and the shared circuit breaker. The adapter is
//! never invoked while the circuit is open.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quorum_config::RetryConfig;
use quorum_core::ProviderId;
use rand::Rng;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::error::LlmError;
use crate::provider::{Generation, Provider};

/// Per-provider call counters
#[derive(Default)]
pub struct ProviderMetrics {
    pub total: AtomicU64,
    pub success: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
    pub circuit_opens: AtomicU64,
}

/// Point-in-time counter values for one provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderMetricsSnapshot {
    pub provider: ProviderId,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub retries: u64,
    pub circuit_opens: u64,
    pub circuit_state: String,
}

/// A provider adapter behind timeout, retry, and circuit breaking
pub struct ResilientClient {
    adapter: Arc<dyn Provider>,
    circuit: Arc<CircuitBreaker>,
    timeout: Duration,
    retry: RetryConfig,
    metrics: ProviderMetrics,
}

impl ResilientClient {
    pub fn new(
        adapter: Arc<dyn Provider>,
        circuit: Arc<CircuitBreaker>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            adapter,
            circuit,
            timeout,
            retry,
            metrics: ProviderMetrics::default(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.adapter.id()
    }

    /// Generate with the full resilience stack applied
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<Generation, LlmError> {
        self.metrics.total.fetch_add(1, Ordering::Relaxed);

        let mut last_error = LlmError::Other("no attempts made".to_owned());

        for attempt in 0..self.retry.max_attempts {
            if let Err(e) = self.circuit.check() {
                self.metrics.circuit_opens.fetch_add(1, Ordering::Relaxed);
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }

            let outcome = tokio::time::timeout(self.timeout, self.adapter.generate(model, prompt)).await;

            let error = match outcome {
                Ok(Ok(generation)) => {
                    self.circuit.record_success();
                    self.metrics.success.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        tracing::info!(
                            provider = %self.provider(),
                            model,
                            attempt,
                            "retry succeeded"
                        );
                    }
                    return Ok(generation);
                }
                Ok(Err(e)) => e,
                Err(_elapsed) => LlmError::Timeout { seconds: self.timeout.as_secs() },
            };

            if error.counts_for_circuit() {
                self.circuit.record_failure();
            }

            if !error.is_retryable() {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    provider = %self.provider(),
                    model,
                    error = %error,
                    "non-retryable error"
                );
                return Err(error);
            }

            last_error = error;

            if attempt + 1 < self.retry.max_attempts {
                self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                let delay = retry_delay(&self.retry, attempt);
                tracing::info!(
                    provider = %self.provider(),
                    model,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    error = %last_error,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            provider = %self.provider(),
            model,
            attempts = self.retry.max_attempts,
            error = %last_error,
            "all retries exhausted"
        );
        Err(last_error)
    }

    /// One probe round-trip gated by the circuit, without retries
    pub async fn probe(&self, model: &str) -> Result<(), LlmError> {
        self.circuit.check()?;
        match tokio::time::timeout(self.timeout, self.adapter.probe(model)).await {
            Ok(Ok(())) => {
                self.circuit.record_success();
                Ok(())
            }
            Ok(Err(e)) => {
                // Warm-up 503s are acceptable for probes and should not
                // count against the provider
                if !matches!(e, LlmError::Loading { .. }) && e.counts_for_circuit() {
                    self.circuit.record_failure();
                }
                Err(e)
            }
            Err(_elapsed) => {
                self.circuit.record_failure();
                Err(LlmError::Timeout { seconds: self.timeout.as_secs() })
            }
        }
    }

    /// Count an externally cancelled call as a provider failure
    ///
    /// Group-timeout cancellation aborts the in-flight future before it
    /// can record its own outcome.
    pub fn record_cancellation(&self) {
        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
        self.circuit.record_failure();
    }

    pub fn metrics_snapshot(&self) -> ProviderMetricsSnapshot {
        let state = match self.circuit.state() {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        ProviderMetricsSnapshot {
            provider: self.provider(),
            total: self.metrics.total.load(Ordering::Relaxed),
            success: self.metrics.success.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
            circuit_opens: self.metrics.circuit_opens.load(Ordering::Relaxed),
            circuit_state: state.to_owned(),
        }
    }
}

/// Backoff delay for a retry attempt: `min(initial × base^attempt, max)`
/// with ±jitter applied
fn retry_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exp = retry.initial_delay_seconds
        * retry
            .exponential_base
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = exp.min(retry.max_delay_seconds);
    let spread = capped * retry.jitter;
    let jittered = capped + rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64(jittered.max(0.0))
}
