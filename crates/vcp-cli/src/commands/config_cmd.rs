//! `vcp config` -- display resolved configuration.
//!
//! Credentials are serialized redacted, so the output is safe to share.
//!
//! ```text
//! vcp config show
//! vcp config section orchestration
//! ```

use vcp_types::Config;

/// Display the resolved configuration as formatted JSON.
pub fn config_show(config: &Config) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: failed to serialize config: {e}"),
    }
}

/// Display one configuration section.
pub fn config_section(config: &Config, section: &str) -> anyhow::Result<()> {
    let value = serde_json::to_value(config)?;
    match value.get(section) {
        Some(v) => {
            println!("{}", serde_json::to_string_pretty(v)?);
            Ok(())
        }
        None => {
            let available: Vec<&str> = value
                .as_object()
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            anyhow::bail!(
                "unknown section '{section}' (available: {})",
                available.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_section_prints() {
        assert!(config_section(&Config::default(), "server").is_ok());
    }

    #[test]
    fn unknown_section_lists_alternatives() {
        let err = config_section(&Config::default(), "nonexistent").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("orchestration"));
    }
}
