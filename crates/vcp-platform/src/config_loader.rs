//! Config file discovery and loading.
//!
//! Discovery order:
//! 1. `VCP_CONFIG` environment variable.
//! 2. `./vcp.json` in the working directory.
//! 3. `~/.vcp/config.json`.
//!
//! A missing file yields defaults. After the file is parsed, the legacy
//! environment variables (`API_URL`, `API_Key`, `PORT`, ...) are layered
//! on top so deployments configured purely through the environment keep
//! working.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use vcp_types::config::RewriteRule;
use vcp_types::{Config, SecretString, VcpError};

use crate::env::Environment;

/// Environment variable naming an explicit config path.
pub const CONFIG_ENV_VAR: &str = "VCP_CONFIG";

/// Find the config file to load, if any.
pub fn discover_config_path(env: &dyn Environment, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = env.get_var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from("vcp.json");
    if local.exists() {
        return Some(local);
    }

    home_dir
        .map(|home| home.join(".vcp").join("config.json"))
        .filter(|p| p.exists())
}

/// Discover, parse and env-override the runtime config.
pub fn load_config(env: &dyn Environment) -> Result<Config, VcpError> {
    let mut config = match discover_config_path(env, dirs::home_dir()) {
        Some(path) if path.exists() => load_config_file(&path)?,
        Some(path) => {
            warn!(path = %path.display(), "config path does not exist, using defaults");
            Config::default()
        }
        None => {
            info!("no config file found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Parse one config file. Keys are normalized to snake_case first.
pub fn load_config_file(path: &Path) -> Result<Config, VcpError> {
    debug!(path = %path.display(), "loading config file");
    let contents = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&contents).map_err(|e| VcpError::ConfigInvalid {
        reason: format!("{}: {e}", path.display()),
    })?;
    serde_json::from_value(normalize_keys(raw)).map_err(|e| VcpError::ConfigInvalid {
        reason: format!("{}: {e}", path.display()),
    })
}

/// Layer the legacy environment variables over a loaded config.
pub fn apply_env_overrides(config: &mut Config, env: &dyn Environment) {
    if let Some(url) = env.get_var("API_URL") {
        config.upstream.base_url = upstream_base(&url);
    }
    if let Some(key) = env.get_var("API_Key") {
        config.upstream.api_key = SecretString::new(key);
    }
    if let Some(port) = env.get_var("PORT") {
        match port.trim().parse() {
            Ok(p) => config.server.port = p,
            Err(_) => warn!(value = %port, "ignoring non-numeric PORT"),
        }
    }
    if let Some(key) = env.get_var("Key") {
        config.server.key = SecretString::new(key);
    }
    if let Some(flag) = env.get_var("DebugMode") {
        config.debug = is_true(&flag);
    }
    if let Some(flag) = env.get_var("ShowVCP") {
        config.orchestration.show_tool_output = is_true(&flag);
    }
    if let Some(flag) = env.get_var("USE_MCP_CODE_EXECUTION") {
        config.sandbox.enabled = is_true(&flag);
    }
    if let Some(rounds) = env.get_var("MaxVCPLoop") {
        match rounds.trim().parse() {
            Ok(n) => config.orchestration.max_rounds = n,
            Err(_) => warn!(value = %rounds, "ignoring non-numeric MaxVCPLoop"),
        }
    }
    config
        .substitution
        .detectors
        .extend(numbered_rules(env, "Detector", "Detector_Output"));
    config
        .substitution
        .super_detectors
        .extend(numbered_rules(env, "SuperDetector", "SuperDetector_Output"));
}

/// `API_URL` historically held the host only; the client wants the `/v1` base.
fn upstream_base(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/v1")
    }
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Collect `Detector1`/`Detector_Output1`, `Detector2`/... until the first gap.
fn numbered_rules(env: &dyn Environment, from_prefix: &str, to_prefix: &str) -> Vec<RewriteRule> {
    let mut rules = Vec::new();
    for n in 1.. {
        let (Some(from), Some(to)) = (
            env.get_var(&format!("{from_prefix}{n}")),
            env.get_var(&format!("{to_prefix}{n}")),
        ) else {
            break;
        };
        rules.push(RewriteRule { from, to });
    }
    rules
}

/// Convert camelCase object keys to snake_case, recursively.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (camel_to_snake(&k), normalize_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// `maxRounds` -> `max_rounds`, `HTTPPort` -> `http_port`.
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnvironment;
    use serde_json::json;

    #[test]
    fn camel_to_snake_cases() {
        assert_eq!(camel_to_snake("maxRounds"), "max_rounds");
        assert_eq!(camel_to_snake("already_snake"), "already_snake");
        assert_eq!(camel_to_snake("HTTPPort"), "http_port");
        assert_eq!(camel_to_snake("port"), "port");
    }

    #[test]
    fn normalize_keys_recurses() {
        let raw = json!({"orchestration": {"maxRounds": 3}, "list": [{"fenceLabel": "x"}]});
        let norm = normalize_keys(raw);
        assert_eq!(norm["orchestration"]["max_rounds"], 3);
        assert_eq!(norm["list"][0]["fence_label"], "x");
    }

    #[test]
    fn explicit_path_wins() {
        let env = MapEnvironment::new().with(CONFIG_ENV_VAR, "/etc/vcp/custom.json");
        let path = discover_config_path(&env, None);
        assert_eq!(path, Some(PathBuf::from("/etc/vcp/custom.json")));
    }

    #[test]
    fn home_config_found() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".vcp")).unwrap();
        std::fs::write(home.path().join(".vcp/config.json"), "{}").unwrap();
        let path = discover_config_path(&MapEnvironment::new(), Some(home.path().to_path_buf()));
        assert_eq!(path, Some(home.path().join(".vcp/config.json")));
    }

    #[test]
    fn missing_explicit_file_gives_defaults() {
        let env = MapEnvironment::new().with(CONFIG_ENV_VAR, "/nonexistent/vcp-config.json");
        let cfg = load_config(&env).unwrap();
        assert_eq!(cfg.server.port, 6005);
    }

    #[test]
    fn file_is_parsed_with_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vcp.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 7000}, "orchestration": {"maxRounds": 2}}"#,
        )
        .unwrap();
        let env = MapEnvironment::new().with(CONFIG_ENV_VAR, path.to_string_lossy());
        let cfg = load_config(&env).unwrap();
        assert_eq!(cfg.server.port, 7000);
        assert_eq!(cfg.orchestration.max_rounds, 2);
    }

    #[test]
    fn malformed_file_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, VcpError::ConfigInvalid { .. }));
    }

    #[test]
    fn legacy_env_overrides() {
        let env = MapEnvironment::new()
            .with("API_URL", "http://localhost:3000/")
            .with("API_Key", "sk-test")
            .with("PORT", "8080")
            .with("DebugMode", "TRUE")
            .with("ShowVCP", "false")
            .with("MaxVCPLoop", "3")
            .with("USE_MCP_CODE_EXECUTION", "true");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, &env);
        assert_eq!(cfg.upstream.base_url, "http://localhost:3000/v1");
        assert_eq!(cfg.upstream.api_key.expose(), "sk-test");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.debug);
        assert!(!cfg.orchestration.show_tool_output);
        assert_eq!(cfg.orchestration.max_rounds, 3);
        assert!(cfg.sandbox.enabled);
    }

    #[test]
    fn bad_port_is_ignored() {
        let env = MapEnvironment::new().with("PORT", "eighty");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, &env);
        assert_eq!(cfg.server.port, 6005);
    }

    #[test]
    fn detector_rules_stop_at_first_gap() {
        let env = MapEnvironment::new()
            .with("Detector1", "foo")
            .with("Detector_Output1", "bar")
            .with("Detector2", "baz")
            .with("SuperDetector1", "......")
            .with("SuperDetector_Output1", "…");
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, &env);
        assert_eq!(
            cfg.substitution.detectors,
            vec![RewriteRule {
                from: "foo".into(),
                to: "bar".into()
            }]
        );
        assert_eq!(cfg.substitution.super_detectors.len(), 1);
    }
}
