//! Exact-match result cache for pipeline runs
//!
//! Caches serialized pipeline results keyed by a SHA-256 hash of the
//! canonical request (input + sorted models + options). Entries expire on
//! a TTL; identical runs short-circuit the pipeline.

#![allow(clippy::must_use_candidate)]

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Cached run entry
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedRun {
    /// Serialized pipeline result (JSON)
    pub body: String,
    /// Model that produced the cached synthesis
    pub synthesis_model: String,
}

/// In-process TTL cache of pipeline results
#[derive(Clone)]
pub struct ResultCache {
    cache: mini_moka::sync::Cache<String, CachedRun>,
}

impl ResultCache {
    /// Create a cache with the given capacity and entry lifetime
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: mini_moka::sync::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Look up a cached run
    pub fn get(&self, cache_key: &str) -> Option<CachedRun> {
        let entry = self.cache.get(&cache_key.to_owned());
        if entry.is_some() {
            tracing::debug!(cache_key, "cache hit");
        } else {
            tracing::debug!(cache_key, "cache miss");
        }
        entry
    }

    /// Store a run
    pub fn put(&self, cache_key: &str, entry: CachedRun) {
        self.cache.insert(cache_key.to_owned(), entry);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

/// Compute a SHA-256 cache key from a serializable request
///
/// Hashes the canonical JSON of the fields that determine the result.
/// Callers must pre-sort the model list so ordering differences do not
/// fragment the cache.
pub fn compute_cache_key<T: serde::Serialize>(request: &T) -> String {
    let json = serde_json::to_string(request).unwrap_or_default();
    let hash = Sha256::digest(json.as_bytes());
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_deterministic() {
        let request = serde_json::json!({"input": "hi", "models": ["a", "b"]});
        assert_eq!(compute_cache_key(&request), compute_cache_key(&request));
    }

    #[test]
    fn cache_key_differs_for_different_input() {
        let a = serde_json::json!({"input": "hi", "models": ["a"]});
        let b = serde_json::json!({"input": "bye", "models": ["a"]});
        assert_ne!(compute_cache_key(&a), compute_cache_key(&b));
    }

    #[test]
    fn round_trip() {
        let cache = ResultCache::new(16, Duration::from_secs(60));
        let entry = CachedRun {
            body: "{\"synthesis\":\"text\"}".to_owned(),
            synthesis_model: "gpt-4o".to_owned(),
        };

        cache.put("key", entry);
        let got = cache.get("key").unwrap();
        assert_eq!(got.synthesis_model, "gpt-4o");
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn clear_drops_entries() {
        let cache = ResultCache::new(16, Duration::from_secs(60));
        cache.put(
            "key",
            CachedRun { body: String::new(), synthesis_model: String::new() },
        );
        cache.clear();
        assert!(cache.get("key").is_none());
    }
}
