//! [`Provider`] implementation for OpenAI-compatible `/chat/completions`.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::sse::{LineBuffer, parse_sse_line};
use crate::types::{ChatRequest, ChatResponse, StreamChunk};

/// HTTP client for any endpoint speaking the OpenAI chat completion format.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn request_builder(&self, body: &ChatRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(self.completions_url())
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(self.config.api_key.expose());
        }
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req.json(body)
    }

    fn timeout_secs(&self) -> u64 {
        self.config.timeout.as_secs()
    }

    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout_secs())
        } else {
            ProviderError::Http(err)
        }
    }

    /// Map a non-success status to the matching error variant.
    async fn check_status(
        &self,
        response: reqwest::Response,
        model: &str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            let retry_after_ms = parse_retry_after_header(&response).unwrap_or(1000);
            warn!(provider = %self.config.name, retry_after_ms, "rate limited");
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => ProviderError::AuthFailed(body),
            404 => ProviderError::ModelNotFound(format!("model '{model}': {body}")),
            _ => ProviderError::RequestFailed(format!("HTTP {status}: {body}")),
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let mut body = request.clone();
        body.stream = None;
        let response = self
            .request_builder(&body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let response = self.check_status(response, &request.model).await?;

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse response: {e}"))
        })?;

        debug!(
            provider = %self.config.name,
            model = %parsed.model,
            choices = parsed.choices.len(),
            "chat completion response received"
        );
        Ok(parsed)
    }

    async fn complete_stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending streaming chat completion request"
        );

        let mut body = request.clone();
        body.stream = Some(true);
        let send = self
            .request_builder(&body)
            .header("Accept", "text/event-stream")
            .send();
        let response = tokio::time::timeout(self.config.timeout, send)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout_secs()))?
            .map_err(|e| self.classify(e))?;
        let response = self.check_status(response, &request.model).await?;

        // `timeout` also bounds the gap between body chunks, so a stalled
        // upstream ends the stream instead of hanging it.
        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();
        loop {
            let next = match tokio::time::timeout(self.config.timeout, bytes.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        provider = %self.config.name,
                        idle_secs = self.timeout_secs(),
                        "upstream stream stalled"
                    );
                    return Err(ProviderError::Timeout(self.timeout_secs()));
                }
            };
            let chunk =
                next.map_err(|e| ProviderError::RequestFailed(format!("stream read error: {e}")))?;
            for line in lines.push(&chunk) {
                if !self.forward_line(&line, &tx).await {
                    debug!(provider = %self.config.name, "stream receiver dropped, stopping");
                    return Ok(());
                }
            }
        }
        if let Some(rest) = lines.finish() {
            self.forward_line(&rest, &tx).await;
        }

        debug!(provider = %self.config.name, "streaming complete");
        Ok(())
    }
}

impl OpenAiCompatProvider {
    /// Parse and send one SSE line. Returns `false` once the receiver is gone.
    async fn forward_line(&self, line: &str, tx: &mpsc::Sender<StreamChunk>) -> bool {
        let chunks = match parse_sse_line(line) {
            Ok(c) => c,
            Err(e) => {
                warn!(provider = %self.config.name, error = %e, "SSE parse error, skipping line");
                return true;
            }
        };
        for chunk in chunks {
            trace!(provider = %self.config.name, chunk = ?chunk, "streaming chunk");
            if tx.send(chunk).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// `Retry-After` in (possibly fractional) seconds, as milliseconds.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    let secs: f64 = value.trim().parse().ok()?;
    Some((secs * 1000.0).max(0.0) as u64)
}
