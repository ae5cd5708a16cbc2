//! CLI command implementations for `vcp`.
//!
//! - [`serve`] -- relay server with scheduler and graceful shutdown.
//! - [`plugins`] -- plugin listing and manual invocation.
//! - [`sandbox`] -- run scripts through the code sandbox.
//! - [`config_cmd`] -- resolved configuration display.

pub mod config_cmd;
pub mod plugins;
pub mod sandbox;
pub mod serve;

use std::path::Path;

use vcp_platform::NativeEnvironment;
use vcp_platform::config_loader::{apply_env_overrides, load_config_file};
use vcp_types::Config;

/// Load configuration from the given path override or via auto-discovery.
///
/// Without an override the discovery chain is `VCP_CONFIG`, `./vcp.json`,
/// then `~/.vcp/config.json`; a missing file yields defaults. The legacy
/// environment overrides apply either way.
pub fn load_config(config_override: Option<&Path>) -> anyhow::Result<Config> {
    let env = NativeEnvironment;
    let Some(path) = config_override else {
        return vcp_platform::config_loader::load_config(&env)
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"));
    };

    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let mut config =
        load_config_file(path).map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    apply_env_overrides(&mut config, &env);
    Ok(config)
}

/// Truncate `s` to at most `max` characters, appending "..." when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
