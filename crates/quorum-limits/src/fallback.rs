//! Rate-limited provider tracking and alternatives
//!
//! When a provider reports quota exhaustion the manager records it with an
//! expiry; while the entry is live, callers are steered toward models from
//! other providers.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use quorum_core::ProviderId;

/// How long a provider stays marked without an explicit duration
const DEFAULT_MARK_DURATION: Duration = Duration::from_secs(60);

/// Tracks rate-limited providers and suggests alternatives
pub struct FallbackManager {
    /// Provider -> instant the mark expires
    rate_limited: DashMap<ProviderId, Instant>,
    /// Preferred substitute models per provider
    models: Vec<(ProviderId, Vec<String>)>,
}

impl FallbackManager {
    /// Create a manager with the stock per-provider model table
    pub fn new() -> Self {
        Self::with_models(vec![
            (
                ProviderId::Openai,
                vec!["gpt-4o".to_owned(), "gpt-4o-mini".to_owned()],
            ),
            (
                ProviderId::Anthropic,
                vec![
                    "claude-3-5-sonnet-20241022".to_owned(),
                    "claude-3-5-haiku-20241022".to_owned(),
                ],
            ),
            (
                ProviderId::Google,
                vec!["gemini-1.5-pro".to_owned(), "gemini-1.5-flash".to_owned()],
            ),
        ])
    }

    /// Create a manager with an explicit substitute-model table
    pub fn with_models(models: Vec<(ProviderId, Vec<String>)>) -> Self {
        Self {
            rate_limited: DashMap::new(),
            models,
        }
    }

    /// Record that a provider is rate limited for `duration`
    pub fn mark_rate_limited(&self, provider: ProviderId, duration: Option<Duration>) {
        let until = Instant::now() + duration.unwrap_or(DEFAULT_MARK_DURATION);
        tracing::warn!(%provider, "provider marked rate-limited");
        self.rate_limited.insert(provider, until);
    }

    /// Whether a provider is currently marked rate limited
    ///
    /// Expired marks are pruned on read.
    pub fn is_rate_limited(&self, provider: ProviderId) -> bool {
        if let Some(entry) = self.rate_limited.get(&provider) {
            if Instant::now() < *entry {
                return true;
            }
            drop(entry);
            self.rate_limited.remove(&provider);
        }
        false
    }

    /// Up to `n` substitute models drawn from other, unmarked providers
    pub fn fallback_models(&self, provider: ProviderId, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for (candidate, models) in &self.models {
            if *candidate == provider || self.is_rate_limited(*candidate) {
                continue;
            }
            for model in models {
                if out.len() == n {
                    return out;
                }
                out.push(model.clone());
            }
        }
        out
    }

    /// The first healthy provider other than `provider`, if any
    pub fn suggest_alternative(&self, provider: ProviderId) -> Option<ProviderId> {
        self.models
            .iter()
            .map(|(candidate, _)| *candidate)
            .find(|candidate| *candidate != provider && !self.is_rate_limited(*candidate))
    }
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new()
    }
}
