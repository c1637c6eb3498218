use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded = crate::env::expand_env(&raw)
            .map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self =
            toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string, without env expansion
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if gating thresholds, retry policy, or detection
    /// patterns are unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_orchestrator()?;
        self.validate_retry()?;
        self.validate_detection()?;
        Ok(())
    }

    fn validate_orchestrator(&self) -> anyhow::Result<()> {
        if self.orchestrator.minimum_models_required == 0 {
            anyhow::bail!("orchestrator.minimum_models_required must be at least 1");
        }

        if self.orchestrator.max_concurrent_requests == 0 {
            anyhow::bail!("orchestrator.max_concurrent_requests must be at least 1");
        }

        for provider in &self.orchestrator.required_providers {
            if provider.parse::<quorum_core::ProviderId>().is_err() {
                anyhow::bail!("orchestrator.required_providers contains unknown provider '{provider}'");
            }
        }

        Ok(())
    }

    fn validate_retry(&self) -> anyhow::Result<()> {
        let policies = std::iter::once(&self.retry).chain(self.providers.values().filter_map(|p| p.retry.as_ref()));

        for retry in policies {
            if retry.max_attempts == 0 {
                anyhow::bail!("retry.max_attempts must be at least 1");
            }
            if retry.exponential_base < 1.0 {
                anyhow::bail!("retry.exponential_base must be at least 1.0");
            }
            if !(0.0..1.0).contains(&retry.jitter) {
                anyhow::bail!("retry.jitter must be in [0, 1)");
            }
        }

        Ok(())
    }

    fn validate_detection(&self) -> anyhow::Result<()> {
        for (provider, patterns) in &self.detection.patterns {
            for pattern in patterns {
                regex::Regex::new(pattern).map_err(|e| {
                    anyhow::anyhow!("invalid rate-limit pattern for provider '{provider}': {e}")
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.orchestrator.minimum_models_required, 3);
        assert_eq!(
            config.orchestrator.required_providers,
            vec!["openai", "anthropic", "google"]
        );
    }

    #[test]
    fn provider_sections_parse() {
        let toml = r#"
            [providers.openai]
            type = "openai"
            default_models = ["gpt-4o"]

            [providers.anthropic]
            type = "anthropic"
            timeout_seconds = 50
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers["openai"].timeout_seconds(), 30);
        assert_eq!(config.providers["anthropic"].timeout_seconds(), 50);
    }

    #[test]
    fn rejects_zero_minimum_models() {
        let toml = "[orchestrator]\nminimum_models_required = 0";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_unknown_required_provider() {
        let toml = "[orchestrator]\nrequired_providers = [\"skynet\"]";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_invalid_detection_pattern() {
        let toml = "[detection.patterns]\nopenai = [\"(\"]";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_bad_retry_policy() {
        let toml = "[retry]\nmax_attempts = 0";
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn default_detection_patterns_compile() {
        let config = Config::from_toml("").unwrap();
        assert!(config.detection.patterns.contains_key("openai"));
        config.validate().unwrap();
    }
}
