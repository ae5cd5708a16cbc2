//! Configuration schema.
//!
//! Every section is `#[serde(default)]` so a partial (or empty) JSON file
//! yields a usable config. Fields accept both `snake_case` and the
//! `camelCase` spelling used by older config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

/// Root configuration for the VCP runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub plugins: PluginsConfig,
    pub orchestration: OrchestrationConfig,
    pub sandbox: SandboxConfig,
    pub substitution: SubstitutionConfig,

    /// Verbose logging plus request/response dumps under `debug_log_dir`.
    pub debug: bool,

    #[serde(default = "default_debug_log_dir", alias = "debugLogDir")]
    pub debug_log_dir: PathBuf,
}

fn default_debug_log_dir() -> PathBuf {
    PathBuf::from("DebugLog")
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on the relay endpoint. Empty disables the check.
    pub key: SecretString,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    6005
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            key: SecretString::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// The OpenAI-compatible API the relay forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(alias = "apiKey")]
    pub api_key: SecretString,

    /// Model used when the client request omits one.
    #[serde(default = "default_model", alias = "defaultModel")]
    pub default_model: String,

    #[serde(default = "default_upstream_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_upstream_timeout() -> u64 {
    300
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: SecretString::default(),
            default_model: default_model(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Plugin discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Root directory scanned for `<plugin>/plugin-manifest.json`.
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,

    /// Exported to plugins as `PROJECT_BASE_PATH`. Defaults to the working directory.
    #[serde(alias = "projectBasePath")]
    pub project_base_path: Option<PathBuf>,

    /// Explicit preprocessor order. `None` runs them in load order.
    pub preprocessors: Option<Vec<String>>,
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            project_base_path: None,
            preprocessors: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Limits for the tool-call loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Upper bound on upstream calls per buffered request.
    #[serde(default = "default_max_rounds", alias = "maxRounds")]
    pub max_rounds: u32,

    /// Interleave raw tool results into the final buffered answer.
    #[serde(alias = "showToolOutput")]
    pub show_tool_output: bool,

    /// Follow-up upstream calls allowed after the first stream.
    #[serde(
        default = "default_stream_follow_up_rounds",
        alias = "streamFollowUpRounds"
    )]
    pub stream_follow_up_rounds: u32,
}

fn default_max_rounds() -> u32 {
    5
}

fn default_stream_follow_up_rounds() -> u32 {
    1
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            show_tool_output: false,
            stream_follow_up_rounds: default_stream_follow_up_rounds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Embedded script execution for fenced code blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,

    /// Info string of the code fence routed to the sandbox (```` ```rhai ````).
    #[serde(default = "default_fence_label", alias = "fenceLabel")]
    pub fence_label: String,

    #[serde(default = "default_sandbox_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Hard cap on interpreter operations, independent of the wall clock.
    #[serde(alias = "maxOperations")]
    pub max_operations: Option<u64>,
}

fn default_fence_label() -> String {
    "rhai".into()
}

fn default_sandbox_timeout() -> u64 {
    30
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fence_label: default_fence_label(),
            timeout_secs: default_sandbox_timeout(),
            max_operations: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Settings for placeholder expansion in outgoing messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstitutionConfig {
    /// Fixed offset for `{{Date}}`/`{{Time}}`; local time when unset.
    #[serde(alias = "utcOffsetMinutes")]
    pub utc_offset_minutes: Option<i32>,

    /// Literal rewrites applied to system messages.
    pub detectors: Vec<RewriteRule>,

    /// Literal rewrites applied to every message.
    #[serde(alias = "superDetectors")]
    pub super_detectors: Vec<RewriteRule>,
}

/// A literal `from -> to` text replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
}
