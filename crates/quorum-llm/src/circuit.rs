//! Per-provider circuit breaking
//!
//! One breaker per provider, shared across every adapter of that provider.
//! Trips only after both the failure threshold and the minimum call count
//! are reached; recovery goes through half-open probing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use quorum_config::CircuitBreakerConfig;
use quorum_core::ProviderId;

use crate::error::LlmError;

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests flow through
    Closed,
    /// Provider is failing, requests are rejected
    Open,
    /// Probing, a limited number of requests test recovery
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_calls: u64,
    last_failure_at: Option<Instant>,
}

/// Circuit breaker guarding one provider
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                total_calls: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Gate a call: `Ok` lets the request through, `Err` rejects it
    ///
    /// An open breaker transitions to half-open once the recovery timeout
    /// has elapsed since the last failure.
    pub fn check(&self) -> Result<(), LlmError> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure_at
                .is_none_or(|at| at.elapsed() >= Duration::from_secs(self.config.recovery_seconds));

            if recovered {
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                tracing::info!(provider = %self.provider, "circuit entering half-open state");
            } else {
                return Err(LlmError::CircuitOpen { provider: self.provider });
            }
        }

        Ok(())
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                tracing::info!(provider = %self.provider, "circuit closed after recovery");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            tracing::warn!(provider = %self.provider, "circuit reopened after half-open failure");
        } else if inner.failure_count >= self.config.failure_threshold
            && inner.total_calls >= u64::from(self.config.min_calls)
        {
            inner.state = CircuitState::Open;
            tracing::warn!(
                provider = %self.provider,
                failures = inner.failure_count,
                "circuit opened"
            );
        }
    }

    /// Current state, without recovery-timeout evaluation
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Observable breaker counters
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_calls: inner.total_calls,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            min_calls: 5,
            recovery_seconds: 60,
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(ProviderId::Openai, config())
    }

    #[test]
    fn closed_breaker_allows_calls() {
        let cb = breaker();
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn stays_closed_below_min_calls() {
        let cb = breaker();
        // Three failures meet the threshold but not the minimum call count
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_threshold_and_min_calls() {
        let cb = breaker();
        cb.record_success();
        cb.record_success();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(LlmError::CircuitOpen { .. })));
    }

    #[test]
    fn success_resets_failure_streak() {
        let cb = breaker();
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_recovery_then_closes_on_successes() {
        let cb = CircuitBreaker::new(
            ProviderId::Openai,
            CircuitBreakerConfig { recovery_seconds: 0, ..config() },
        );
        cb.record_success();
        cb.record_success();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero recovery timeout, so the next check transitions to half-open
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let cb = CircuitBreaker::new(
            ProviderId::Openai,
            CircuitBreakerConfig { recovery_seconds: 0, ..config() },
        );
        cb.record_success();
        cb.record_success();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
