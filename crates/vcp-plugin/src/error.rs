//! Plugin error types.

use thiserror::Error;

/// Errors raised while loading, configuring or running plugins.
///
/// Only [`LoadError`](PluginError::LoadError) and
/// [`DuplicateName`](PluginError::DuplicateName) come out of the loader;
/// everything else is an invocation-time failure that the registry turns
/// into a [`PluginInvocationResult::Failure`](crate::PluginInvocationResult).
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("failed to load plugin at {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("duplicate plugin name '{0}'")]
    DuplicateName(String),

    #[error("plugin '{plugin}': cannot read {key}={value:?} as {expected}")]
    ConfigCoercion {
        plugin: String,
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin '{0}' is disabled")]
    Disabled(String),

    #[error("plugin '{plugin}' is a {actual} plugin, expected {expected}")]
    WrongKind {
        plugin: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("plugin '{plugin}' uses unsupported protocol '{protocol}'")]
    UnsupportedProtocol { plugin: String, protocol: String },

    #[error("Plugin '{plugin}' execution timed out after {timeout_ms}ms")]
    ProcessTimeout { plugin: String, timeout_ms: u64 },

    #[error("Plugin '{plugin}' exited with code {code}. Stdout: {stdout}. Stderr: {stderr}")]
    ProcessExit {
        plugin: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The plugin ran but reported an error, or could not be started.
    #[error("{message}")]
    ExecutionFailed { plugin: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_exit_display() {
        let err = PluginError::ProcessExit {
            plugin: "Weather".into(),
            code: 2,
            stdout: "partial".into(),
            stderr: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "Plugin 'Weather' exited with code 2. Stdout: partial. Stderr: boom"
        );
    }

    #[test]
    fn coercion_display() {
        let err = PluginError::ConfigCoercion {
            plugin: "Calc".into(),
            key: "Precision".into(),
            expected: "integer",
            value: "ten".into(),
        };
        assert_eq!(
            err.to_string(),
            "plugin 'Calc': cannot read Precision=\"ten\" as integer"
        );
    }

    #[test]
    fn execution_failed_is_bare_message() {
        let err = PluginError::ExecutionFailed {
            plugin: "X".into(),
            message: "city not found".into(),
        };
        assert_eq!(err.to_string(), "city not found");
    }
}
