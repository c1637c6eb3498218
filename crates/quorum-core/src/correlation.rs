//! Correlation id propagation
//!
//! Every pipeline run carries one opaque correlation id through logs,
//! spans, and stream events. The id is scoped task-locally so concurrent
//! operations started inside a run inherit it without explicit threading.

use serde::{Deserialize, Serialize};

/// Opaque identifier for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh short opaque id
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..12].to_owned())
    }

    /// Wrap an externally supplied id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve an id: explicit value wins, then the inherited task-local,
    /// then a newly generated one
    pub fn resolve(explicit: Option<&str>) -> Self {
        if let Some(id) = explicit.filter(|s| !s.is_empty()) {
            return Self::new(id);
        }
        current_correlation().unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// The correlation id of the enclosing run, if any
pub fn current_correlation() -> Option<CorrelationId> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Run a future with the given correlation id set task-locally
pub async fn with_correlation<F>(id: CorrelationId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(id, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn explicit_id_wins() {
        let id = CorrelationId::resolve(Some("req-42"));
        assert_eq!(id.as_str(), "req-42");
    }

    #[test]
    fn empty_explicit_id_is_ignored() {
        let id = CorrelationId::resolve(Some(""));
        assert_ne!(id.as_str(), "");
    }

    #[tokio::test]
    async fn inherited_id_is_used_when_no_explicit() {
        let outer = CorrelationId::new("inherited");
        let resolved = with_correlation(outer.clone(), async { CorrelationId::resolve(None) }).await;
        assert_eq!(resolved, outer);
    }

    #[tokio::test]
    async fn scope_does_not_leak() {
        with_correlation(CorrelationId::new("scoped"), async {
            assert_eq!(current_correlation().unwrap().as_str(), "scoped");
        })
        .await;
        assert!(current_correlation().is_none());
    }
}
