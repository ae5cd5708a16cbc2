//! Plugin manifest (`plugin-manifest.json`) schema and validation.
//!
//! ```json
//! {
//!   "name": "Weather",
//!   "displayName": "Weather report",
//!   "pluginType": "static",
//!   "entryPoint": { "command": "python weather.py" },
//!   "communication": { "protocol": "stdio", "timeout": 20000 },
//!   "capabilities": {
//!     "systemPromptPlaceholders": [{ "placeholder": "{{VCPWeatherInfo}}" }]
//!   },
//!   "configSchema": { "WeatherKey": "string", "Days": "integer" },
//!   "refreshIntervalCron": "0 */4 * * *"
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

/// Default deadline for static plugins.
pub const STATIC_TIMEOUT_MS: u64 = 30_000;
/// Default deadline for synchronous plugins.
pub const SYNCHRONOUS_TIMEOUT_MS: u64 = 5_000;

/// Execution strategy of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginKind {
    /// Run on a schedule; output fills a prompt placeholder.
    Static,
    /// Run per tool call as a subprocess.
    Synchronous,
    /// In-process transform of the outgoing conversation.
    MessagePreprocessor,
    /// In-process HTTP routes.
    Service,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Static => "static",
            PluginKind::Synchronous => "synchronous",
            PluginKind::MessagePreprocessor => "messagePreprocessor",
            PluginKind::Service => "service",
        }
    }

    /// Kinds executed as external processes.
    pub fn is_subprocess(&self) -> bool {
        matches!(self, PluginKind::Static | PluginKind::Synchronous)
    }
}

/// How the plugin is started.
///
/// Subprocess kinds use `command`; in-process kinds use `script`, the name
/// of a registered implementation. A bare string is read as `command`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntryPoint")]
pub struct EntryPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntryPoint {
    Command(String),
    Spec {
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        script: Option<String>,
    },
}

impl From<RawEntryPoint> for EntryPoint {
    fn from(raw: RawEntryPoint) -> Self {
        match raw {
            RawEntryPoint::Command(command) => EntryPoint {
                command: Some(command),
                script: None,
            },
            RawEntryPoint::Spec { command, script } => EntryPoint { command, script },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Stdio,
    Direct,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    #[serde(default)]
    pub protocol: Protocol,

    /// Deadline in milliseconds.
    #[serde(default, alias = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// One tool-call command a plugin advertises to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationCommand {
    #[serde(default, alias = "commandIdentifier")]
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderDecl {
    pub placeholder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub invocation_commands: Vec<InvocationCommand>,
    #[serde(default)]
    pub system_prompt_placeholders: Vec<PlaceholderDecl>,
}

/// Primitive type a config value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(other)]
    String,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Integer => "integer",
            ConfigType::Boolean => "boolean",
            ConfigType::String => "string",
        }
    }
}

/// Exposes another plugin's resolved config value as an environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigImport {
    pub plugin: String,
    pub key: String,
    pub env: String,
}

/// A parsed and validated plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "pluginType", alias = "kind")]
    pub kind: PluginKind,

    pub entry_point: EntryPoint,

    #[serde(default)]
    pub communication: Communication,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub config_schema: BTreeMap<String, ConfigType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_cron: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import_config: Vec<ConfigImport>,

    /// Argument passed to stdin as a raw string instead of a JSON object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_argument: Option<String>,

    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub base_path: PathBuf,

    /// `false` when loaded from the `.block` variant.
    #[serde(skip, default = "enabled_by_default")]
    pub enabled: bool,

    /// Values from the plugin's own `.env` file.
    #[serde(skip)]
    pub env_overrides: HashMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

impl PluginManifest {
    /// Parse and validate manifest JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| PluginError::LoadError {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the fields serde cannot enforce.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PluginError::LoadError {
            path: self.base_path.display().to_string(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is required".into()));
        }
        if self.kind.is_subprocess() {
            if self.command().is_none() {
                return Err(invalid(format!(
                    "{} plugin '{}' needs entryPoint.command",
                    self.kind.as_str(),
                    self.name
                )));
            }
        } else if self.implementation().is_none() {
            return Err(invalid(format!(
                "{} plugin '{}' needs entryPoint.script",
                self.kind.as_str(),
                self.name
            )));
        }
        if self.refresh_interval_cron.is_some() && self.kind != PluginKind::Static {
            return Err(invalid("refreshIntervalCron is only valid for static plugins".into()));
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Shell command for subprocess kinds.
    pub fn command(&self) -> Option<&str> {
        self.entry_point
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }

    /// Registered implementation name for in-process kinds.
    pub fn implementation(&self) -> Option<&str> {
        self.entry_point
            .script
            .as_deref()
            .or(self.entry_point.command.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Effective deadline, falling back to the per-kind default.
    pub fn timeout(&self) -> Duration {
        let default = match self.kind {
            PluginKind::Static => STATIC_TIMEOUT_MS,
            _ => SYNCHRONOUS_TIMEOUT_MS,
        };
        Duration::from_millis(self.communication.timeout.unwrap_or(default))
    }

    /// Declared placeholders as `{{Key}}` tokens.
    pub fn placeholders(&self) -> Vec<String> {
        self.capabilities
            .system_prompt_placeholders
            .iter()
            .map(|p| normalize_placeholder(&p.placeholder))
            .collect()
    }
}

/// Wrap a placeholder name in `{{ }}` unless it already is.
pub fn normalize_placeholder(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        trimmed.to_owned()
    } else {
        format!("{{{{{trimmed}}}}}")
    }
}

/// Resolve `base_path` for a manifest found at `manifest_path`.
pub(crate) fn plugin_dir(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_manifest() -> &'static str {
        r#"{
            "name": "SciCalculator",
            "displayName": "Scientific calculator",
            "pluginType": "synchronous",
            "entryPoint": {"command": "python calculator.py"},
            "communication": {"protocol": "stdio", "timeout": 8000},
            "capabilities": {
                "invocationCommands": [
                    {"command": "calculate", "description": "Evaluate an expression.", "example": "tool_name:「始」SciCalculator「末」"}
                ]
            },
            "configSchema": {"Precision": "integer", "Verbose": "boolean", "Mode": "string"},
            "stdinArgument": "expression"
        }"#
    }

    #[test]
    fn parses_full_manifest() {
        let m = PluginManifest::from_json(sync_manifest()).unwrap();
        assert_eq!(m.name, "SciCalculator");
        assert_eq!(m.display_name(), "Scientific calculator");
        assert_eq!(m.kind, PluginKind::Synchronous);
        assert_eq!(m.command(), Some("python calculator.py"));
        assert_eq!(m.communication.protocol, Protocol::Stdio);
        assert_eq!(m.timeout(), Duration::from_millis(8000));
        assert_eq!(m.capabilities.invocation_commands.len(), 1);
        assert_eq!(m.config_schema["Precision"], ConfigType::Integer);
        assert_eq!(m.config_schema["Verbose"], ConfigType::Boolean);
        assert_eq!(m.stdin_argument.as_deref(), Some("expression"));
        assert!(m.enabled);
    }

    #[test]
    fn bare_string_entry_point_and_kind_alias() {
        let m = PluginManifest::from_json(
            r#"{"name": "Echo", "kind": "synchronous", "entryPoint": "echo-plugin"}"#,
        )
        .unwrap();
        assert_eq!(m.command(), Some("echo-plugin"));
        assert_eq!(m.timeout(), Duration::from_millis(SYNCHRONOUS_TIMEOUT_MS));
    }

    #[test]
    fn static_default_timeout() {
        let m = PluginManifest::from_json(
            r#"{"name": "W", "pluginType": "static", "entryPoint": {"command": "echo x"},
                "refreshIntervalCron": "*/5 * * * *"}"#,
        )
        .unwrap();
        assert_eq!(m.timeout(), Duration::from_millis(STATIC_TIMEOUT_MS));
        assert_eq!(m.refresh_interval_cron.as_deref(), Some("*/5 * * * *"));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        for json in [
            r#"{"pluginType": "synchronous", "entryPoint": "x"}"#,
            r#"{"name": "A", "entryPoint": "x"}"#,
            r#"{"name": "A", "pluginType": "synchronous"}"#,
            r#"{"name": "  ", "pluginType": "synchronous", "entryPoint": "x"}"#,
            r#"{"name": "A", "pluginType": "synchronous", "entryPoint": {"script": "x"}}"#,
        ] {
            let err = PluginManifest::from_json(json).unwrap_err();
            assert!(matches!(err, PluginError::LoadError { .. }), "{json}");
        }
    }

    #[test]
    fn in_process_kinds_need_script() {
        let m = PluginManifest::from_json(
            r#"{"name": "Img", "pluginType": "messagePreprocessor", "entryPoint": {"script": "ImageStripper"}}"#,
        )
        .unwrap();
        assert_eq!(m.implementation(), Some("ImageStripper"));
        assert!(!m.kind.is_subprocess());
    }

    #[test]
    fn cron_on_non_static_is_rejected() {
        let err = PluginManifest::from_json(
            r#"{"name": "A", "pluginType": "synchronous", "entryPoint": "x", "refreshIntervalCron": "* * * * *"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("refreshIntervalCron"));
    }

    #[test]
    fn unknown_config_type_reads_as_string() {
        let m = PluginManifest::from_json(
            r#"{"name": "A", "pluginType": "synchronous", "entryPoint": "x", "configSchema": {"K": "url"}}"#,
        )
        .unwrap();
        assert_eq!(m.config_schema["K"], ConfigType::String);
    }

    #[test]
    fn placeholder_normalization() {
        assert_eq!(normalize_placeholder("VCPWeather"), "{{VCPWeather}}");
        assert_eq!(normalize_placeholder("{{VCPWeather}}"), "{{VCPWeather}}");
        assert_eq!(normalize_placeholder(" {{X}} "), "{{X}}");
    }
}
