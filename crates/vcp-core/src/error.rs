//! Error types for the orchestration core.

use thiserror::Error;
use vcp_llm::ProviderError;
use vcp_plugin::PluginError;

/// Failure of one sandboxed script.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("script timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("script error: {0}")]
    Runtime(String),

    #[error("script worker failed: {0}")]
    Join(String),
}

/// Errors surfaced by the core to its callers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("upstream error: {0}")]
    Upstream(#[from] ProviderError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            SandboxError::Timeout { seconds: 1 }.to_string(),
            "script timed out after 1s"
        );
        let err: CoreError = ProviderError::NotConfigured("no key".into()).into();
        assert!(err.to_string().starts_with("upstream error:"));
    }
}
