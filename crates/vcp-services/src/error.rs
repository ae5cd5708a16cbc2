//! Service error types.

use thiserror::Error;
use vcp_plugin::PluginError;

/// Errors produced by services in this crate.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A cron expression could not be parsed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    /// A plugin run on behalf of a service failed.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
