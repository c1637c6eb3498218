use serde::Deserialize;

/// Pipeline result caching
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether identical runs short-circuit through the cache
    #[serde(default)]
    pub enabled: bool,
    /// Entry lifetime in seconds
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Maximum cached runs
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: default_ttl_seconds(),
            capacity: default_capacity(),
        }
    }
}

const fn default_ttl_seconds() -> u64 {
    600
}

const fn default_capacity() -> u64 {
    1024
}
