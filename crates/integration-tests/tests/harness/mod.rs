//! Shared test harness

pub mod mock_provider;

use mock_provider::MockProviders;

/// Build a config wiring the mock providers plus extra TOML sections
///
/// Enhanced synthesis is off by default so candidate ordering stays
/// deterministic and no metrics file is written.
pub fn test_config(mock: &MockProviders, extra: &str) -> quorum_config::Config {
    let toml = format!(
        r#"
        [retry]
        max_attempts = 2
        initial_delay_seconds = 0.05
        max_delay_seconds = 0.1

        [synthesis]
        enhanced = false

        {providers}

        {extra}
        "#,
        providers = mock.provider_config(),
    );
    quorum_config::Config::from_toml(&toml).expect("test config parses")
}

/// The standard three-model request used across scenarios
pub fn big3() -> Vec<String> {
    vec![
        "gpt-4".to_owned(),
        "claude-3-5-sonnet-20241022".to_owned(),
        "gemini-1.5-flash".to_owned(),
    ]
}
