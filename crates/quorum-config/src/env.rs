use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in raw TOML text
///
/// `{{ env.VAR | default("fallback") }}` substitutes the fallback when the
/// variable is unset. Comment lines pass through unchanged so documented
/// examples never fail expansion.
pub fn expand_env(input: &str) -> Result<String, String> {
    fn placeholder() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
                .expect("placeholder pattern is valid")
        })
    }

    let mut output = String::with_capacity(input.len());
    let mut missing: Option<String> = None;

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let expanded = placeholder().replace_all(line, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            match std::env::var(var) {
                Ok(value) => value,
                Err(_) => caps.get(2).map_or_else(
                    || {
                        missing.get_or_insert_with(|| var.to_owned());
                        String::new()
                    },
                    |default| default.as_str().to_owned(),
                ),
            }
        });
        output.push_str(&expanded);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    match missing {
        Some(var) => Err(format!("environment variable not found: `{var}`")),
        None => Ok(output),
    }
}
