//! Top-level error type shared across the VCP crates.

use thiserror::Error;

/// Errors that cross crate boundaries (configuration, bootstrap, I/O).
///
/// Per-subsystem failures have their own enums (`PluginError`,
/// `ProviderError`, ...) and are folded into this type only where the
/// binary needs a single error to report.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum VcpError {
    /// Configuration could not be parsed or is semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },

    /// The upstream model API failed.
    #[error("provider error: {message}")]
    Provider {
        /// Message reported by the provider layer.
        message: String,
    },

    /// A plugin could not be loaded.
    #[error("failed to load plugin: {plugin}")]
    PluginLoadFailed {
        /// Name or path of the plugin.
        plugin: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VcpError>;
