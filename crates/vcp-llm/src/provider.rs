//! The [`Provider`] trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse, StreamChunk};

/// Something that can answer chat completion requests.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Buffered completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion. Chunks are pushed into `tx` as they arrive;
    /// the call returns once the upstream stream ends. A dropped receiver
    /// ends the stream early without error.
    async fn complete_stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<()>;
}
