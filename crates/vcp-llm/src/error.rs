//! Upstream errors.

use thiserror::Error;

/// Errors from talking to the upstream model API.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-success HTTP status not covered by a more specific variant.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// HTTP 401/403.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// HTTP 429.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// HTTP 404.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The body could not be decoded as a chat completion.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("upstream request timed out after {0}s")]
    Timeout(u64),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
