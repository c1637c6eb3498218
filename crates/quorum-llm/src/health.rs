//! Process-wide model health cache
//!
//! Caches probe results per model with a TTL so repeated gating checks
//! never hammer provider endpoints. Readers see snapshots and never
//! mutate; only the cache itself writes entries.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::LlmError;
use crate::resilient::ResilientClient;

/// Default entry lifetime
const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

/// TTL cache of `model -> healthy?`
pub struct HealthCache {
    entries: DashMap<String, HealthEntry>,
    ttl: Duration,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached health for a model, when still fresh
    pub fn cached(&self, model: &str) -> Option<bool> {
        let entry = self.entries.get(model)?;
        (entry.checked_at.elapsed() < self.ttl).then_some(entry.healthy)
    }

    /// Record a health observation
    pub fn set(&self, model: &str, healthy: bool) {
        tracing::info!(model, healthy, "health status updated");
        self.entries.insert(
            model.to_owned(),
            HealthEntry { healthy, checked_at: Instant::now() },
        );
    }

    /// Drop one model's entry, or every entry
    pub fn invalidate(&self, model: Option<&str>) {
        match model {
            Some(model) => {
                self.entries.remove(model);
            }
            None => self.entries.clear(),
        }
    }

    /// Probe a model through its resilient client, serving cached answers
    ///
    /// A warm-up `loading` response counts as healthy: the model exists
    /// and will serve shortly.
    pub async fn probe(&self, model: &str, client: &ResilientClient) -> bool {
        if let Some(cached) = self.cached(model) {
            tracing::debug!(model, cached, "using cached health status");
            return cached;
        }

        let healthy = match client.probe(model).await {
            Ok(()) | Err(LlmError::Loading { .. }) => true,
            Err(e) => {
                tracing::warn!(model, error = %e, "health probe failed");
                false
            }
        };

        self.set(model, healthy);
        healthy
    }

    /// All cached entries with age and expiry metadata
    pub fn snapshot(&self) -> Vec<HealthStatus> {
        self.entries
            .iter()
            .map(|entry| {
                let age = entry.checked_at.elapsed();
                HealthStatus {
                    model: entry.key().clone(),
                    healthy: entry.healthy,
                    age_seconds: age.as_secs(),
                    expired: age >= self.ttl,
                }
            })
            .collect()
    }
}

impl Default for HealthCache {
    fn default() -> Self {
        Self::new()
    }
}

/// One cached health observation
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub model: String,
    pub healthy: bool,
    pub age_seconds: u64,
    pub expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_has_no_answer() {
        let cache = HealthCache::new();
        assert!(cache.cached("gpt-4").is_none());
    }

    #[test]
    fn set_then_cached() {
        let cache = HealthCache::new();
        cache.set("gpt-4", true);
        assert_eq!(cache.cached("gpt-4"), Some(true));
        cache.set("gpt-4", false);
        assert_eq!(cache.cached("gpt-4"), Some(false));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = HealthCache::with_ttl(Duration::from_millis(5));
        cache.set("gpt-4", true);
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.cached("gpt-4").is_none());

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].expired);
    }

    #[test]
    fn invalidate_single_and_all() {
        let cache = HealthCache::new();
        cache.set("gpt-4", true);
        cache.set("gemini-1.5-flash", true);

        cache.invalidate(Some("gpt-4"));
        assert!(cache.cached("gpt-4").is_none());
        assert_eq!(cache.cached("gemini-1.5-flash"), Some(true));

        cache.invalidate(None);
        assert!(cache.snapshot().is_empty());
    }
}
