//! Per-endpoint rate limiting with adaptive backoff
//!
//! Each endpoint gets a calendar-minute window. When the window is full,
//! `acquire` sleeps `backoff_factor × 60 / rpm` and tries again; the
//! backoff factor doubles on failure and halves on success, floored at 1.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use dashmap::DashMap;
use quorum_config::RateLimitConfig;

/// Length of one rate window
const WINDOW: Duration = Duration::from_secs(60);

struct BucketState {
    in_window: u32,
    window_start: Instant,
    backoff_factor: f64,
}

struct Bucket {
    rpm: u32,
    burst: u32,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn new(rpm: u32, burst: Option<u32>) -> Self {
        Self {
            rpm: rpm.max(1),
            burst: burst.unwrap_or(rpm).max(1),
            state: Mutex::new(BucketState {
                in_window: 0,
                window_start: Instant::now(),
                backoff_factor: 1.0,
            }),
        }
    }
}

struct LimiterInner {
    buckets: DashMap<String, Arc<Bucket>>,
    default_rpm: u32,
    default_burst: Option<u32>,
}

impl LimiterInner {
    fn bucket(&self, endpoint: &str) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get(endpoint) {
            return Arc::clone(&bucket);
        }
        // Auto-register unknown endpoints with defaults
        let bucket = Arc::new(Bucket::new(self.default_rpm, self.default_burst));
        self.buckets
            .entry(endpoint.to_owned())
            .or_insert(bucket)
            .clone()
    }

    fn release(&self, endpoint: &str, success: bool) {
        let Some(bucket) = self.buckets.get(endpoint) else {
            return;
        };
        let mut state = bucket.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if success {
            state.backoff_factor = (state.backoff_factor * 0.5).max(1.0);
        } else {
            state.backoff_factor *= 2.0;
        }
    }
}

/// Process-wide outbound rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    /// Build a limiter from configuration, pre-registering listed endpoints
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiter = Self {
            inner: Arc::new(LimiterInner {
                buckets: DashMap::new(),
                default_rpm: config.default_rpm,
                default_burst: config.default_burst,
            }),
        };

        for (endpoint, limit) in &config.endpoints {
            limiter.register(endpoint, limit.rpm, limit.burst);
        }

        limiter
    }

    /// Register an endpoint with explicit limits
    pub fn register(&self, endpoint: &str, rpm: u32, burst: Option<u32>) {
        self.inner
            .buckets
            .insert(endpoint.to_owned(), Arc::new(Bucket::new(rpm, burst)));
    }

    /// Acquire a slot for the endpoint, sleeping while the window is full
    ///
    /// The returned permit must be completed with the call outcome; a
    /// dropped permit (cancellation) releases as a failure so adaptive
    /// backoff still reacts.
    pub async fn acquire(&self, endpoint: &str) -> RatePermit {
        let bucket = self.inner.bucket(endpoint);

        loop {
            let wait = {
                let mut state = bucket.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

                if state.window_start.elapsed() >= WINDOW {
                    state.in_window = 0;
                    state.window_start = Instant::now();
                    state.backoff_factor = 1.0;
                }

                if state.in_window >= bucket.rpm {
                    let delay = state.backoff_factor * 60.0 / f64::from(bucket.rpm);
                    state.backoff_factor *= 2.0;
                    Some(Duration::from_secs_f64(delay))
                } else {
                    state.in_window += 1;
                    None
                }
            };

            match wait {
                Some(delay) => {
                    tracing::debug!(endpoint, delay_secs = delay.as_secs_f64(), "rate window full, backing off");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return RatePermit {
                        inner: Arc::clone(&self.inner),
                        endpoint: endpoint.to_owned(),
                        done: false,
                    };
                }
            }
        }
    }

    /// Current statistics for an endpoint
    pub fn stats(&self, endpoint: &str) -> Option<EndpointStats> {
        let bucket = self.inner.buckets.get(endpoint)?;
        let state = bucket.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Some(EndpointStats {
            rpm: bucket.rpm,
            burst: bucket.burst,
            in_window: state.in_window,
            backoff_factor: state.backoff_factor,
            seconds_until_reset: WINDOW.saturating_sub(state.window_start.elapsed()).as_secs_f64(),
        })
    }
}

/// A held rate-limiter slot
///
/// Dropping without [`RatePermit::complete`] counts as a failed call.
pub struct RatePermit {
    inner: Arc<LimiterInner>,
    endpoint: String,
    done: bool,
}

impl RatePermit {
    /// Release the slot, adjusting backoff for the observed outcome
    pub fn complete(mut self, success: bool) {
        self.done = true;
        self.inner.release(&self.endpoint, success);
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if !self.done {
            self.inner.release(&self.endpoint, false);
        }
    }
}

/// Snapshot of an endpoint's rate state
#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub rpm: u32,
    pub burst: u32,
    pub in_window: u32,
    pub backoff_factor: f64,
    pub seconds_until_reset: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::from_config(&RateLimitConfig::default())
    }

    #[tokio::test]
    async fn acquire_auto_registers_endpoint() {
        let limiter = limiter();
        let permit = limiter.acquire("openai").await;
        permit.complete(true);
        assert!(limiter.stats("openai").is_some());
    }

    #[tokio::test]
    async fn success_halves_backoff_floored_at_one() {
        let limiter = limiter();
        limiter.register("ep", 10, None);

        limiter.acquire("ep").await.complete(false);
        let backed_off = limiter.stats("ep").unwrap().backoff_factor;
        assert!((backed_off - 2.0).abs() < f64::EPSILON);

        limiter.acquire("ep").await.complete(true);
        limiter.acquire("ep").await.complete(true);
        let floored = limiter.stats("ep").unwrap().backoff_factor;
        assert!((floored - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn dropped_permit_counts_as_failure() {
        let limiter = limiter();
        limiter.register("ep", 10, None);

        drop(limiter.acquire("ep").await);

        let stats = limiter.stats("ep").unwrap();
        assert!((stats.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_blocks_until_backoff_elapses() {
        let limiter = limiter();
        limiter.register("ep", 2, None);

        limiter.acquire("ep").await.complete(true);
        limiter.acquire("ep").await.complete(true);
        assert_eq!(limiter.stats("ep").unwrap().in_window, 2);

        // Third acquire must sleep; with paused time it completes only
        // after the clock is advanced past the backoff delay.
        let acquire = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire("ep").await.complete(true) }
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        acquire.await.unwrap();

        // Window rolled over, so the counter restarted
        assert_eq!(limiter.stats("ep").unwrap().in_window, 1);
    }

    #[tokio::test]
    async fn stats_reports_configured_limits() {
        let limiter = limiter();
        limiter.register("ep", 30, Some(45));
        let stats = limiter.stats("ep").unwrap();
        assert_eq!(stats.rpm, 30);
        assert_eq!(stats.burst, 45);
        assert_eq!(stats.in_window, 0);
    }
}
