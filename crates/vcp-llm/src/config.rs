//! Connection settings for [`OpenAiCompatProvider`](crate::OpenAiCompatProvider).

use std::collections::HashMap;
use std::time::Duration;

use vcp_types::SecretString;
use vcp_types::config::UpstreamConfig;

/// Where and how to reach the upstream API.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Label used in logs.
    pub name: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: SecretString,
    /// Per-request deadline for buffered calls and for the first byte of a stream.
    pub timeout: Duration,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            name: "upstream".into(),
            base_url: base_url.into(),
            api_key: SecretString::default(),
            timeout: Duration::from_secs(300),
            headers: HashMap::new(),
        }
    }
}

impl From<&UpstreamConfig> for ProviderConfig {
    fn from(cfg: &UpstreamConfig) -> Self {
        Self {
            name: "upstream".into(),
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            headers: HashMap::new(),
        }
    }
}
