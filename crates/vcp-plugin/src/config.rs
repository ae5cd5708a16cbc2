//! Per-plugin configuration resolution.
//!
//! For every key in a manifest's `configSchema` the plugin's own `.env`
//! file wins over the process environment. Missing keys stay missing and
//! values that do not coerce to the declared type are dropped with a
//! warning, so a plugin never sees a made-up zero or `false`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use vcp_platform::Environment;

use crate::error::PluginError;
use crate::manifest::{ConfigType, PluginManifest};

/// Name of the plugin-scoped override file.
pub const PLUGIN_ENV_FILE: &str = ".env";
/// Key of the always-present debug flag.
pub const DEBUG_KEY: &str = "DebugMode";

/// A coerced config value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl ConfigValue {
    /// Rendering used when exporting to a child process environment.
    pub fn to_env_string(&self) -> String {
        match self {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Integer(n) => n.to_string(),
            ConfigValue::Boolean(b) => b.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::Integer(n) => Value::from(*n),
            ConfigValue::Boolean(b) => Value::Bool(*b),
        }
    }
}

/// Resolved configuration of one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPluginConfig {
    values: BTreeMap<String, ConfigValue>,
    debug_mode: bool,
}

impl ResolvedPluginConfig {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `KEY=value` pairs for a child process, including `DebugMode`.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<_> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_env_string()))
            .collect();
        if !self.values.contains_key(DEBUG_KEY) {
            env.push((DEBUG_KEY.to_owned(), self.debug_mode.to_string()));
        }
        env
    }

    pub fn to_json(&self) -> Value {
        let mut map: serde_json::Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        map.insert(DEBUG_KEY.to_owned(), Value::Bool(self.debug_mode));
        Value::Object(map)
    }
}

/// Builds [`ResolvedPluginConfig`]s from a manifest and the environment.
#[derive(Clone)]
pub struct ConfigResolver {
    env: Arc<dyn Environment>,
}

impl ConfigResolver {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    pub fn resolve(&self, manifest: &PluginManifest) -> ResolvedPluginConfig {
        let lookup = |key: &str| {
            manifest
                .env_overrides
                .get(key)
                .cloned()
                .or_else(|| self.env.get_var(key))
        };

        let mut values = BTreeMap::new();
        for (key, ty) in &manifest.config_schema {
            let Some(raw) = lookup(key) else {
                continue;
            };
            match coerce(&manifest.name, key, *ty, &raw) {
                Ok(value) => {
                    values.insert(key.clone(), value);
                }
                Err(e) => warn!(plugin = %manifest.name, error = %e, "config value omitted"),
            }
        }

        let debug_mode = match values.get(DEBUG_KEY) {
            Some(ConfigValue::Boolean(b)) => *b,
            _ => lookup(DEBUG_KEY).is_some_and(|v| parse_bool(&v)),
        };
        ResolvedPluginConfig { values, debug_mode }
    }
}

fn coerce(plugin: &str, key: &str, ty: ConfigType, raw: &str) -> Result<ConfigValue, PluginError> {
    match ty {
        ConfigType::String => Ok(ConfigValue::String(raw.to_owned())),
        ConfigType::Boolean => Ok(ConfigValue::Boolean(parse_bool(raw))),
        ConfigType::Integer => raw
            .trim()
            .parse()
            .map(ConfigValue::Integer)
            .map_err(|_| PluginError::ConfigCoercion {
                plugin: plugin.to_owned(),
                key: key.to_owned(),
                expected: ty.as_str(),
                value: raw.to_owned(),
            }),
    }
}

fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// Parse `.env` contents with the usual dotenv rules: quoting, escapes in
/// double quotes, inline comments and `export` prefixes. Malformed lines
/// are skipped with a warning.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    dotenvy::from_read_iter(contents.as_bytes())
        .filter_map(|item| match item {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(error = %e, "skipping malformed .env line");
                None
            }
        })
        .collect()
}

/// Read `<dir>/.env`, returning an empty map when it does not exist.
pub fn load_plugin_env(dir: &Path) -> std::io::Result<HashMap<String, String>> {
    match std::fs::read_to_string(dir.join(PLUGIN_ENV_FILE)) {
        Ok(contents) => Ok(parse_env_file(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}
