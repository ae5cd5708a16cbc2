//! Server-sent events for streamed chat requests.
//!
//! Orchestration runs in its own task and feeds [`StreamEvent`]s through a
//! channel; each one becomes a single `data:` line:
//!
//! | event | data |
//! |-------|------|
//! | `Delta` | OpenAI `chat.completion.chunk` JSON |
//! | `Marker` | `[TOOL_CALL_DETECTED]` or `[CODE_EXECUTION]` |
//! | `Error` | `{"error": "<message>"}` |
//! | `Finished` | `[DONE]` |

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, Sse};
use futures_util::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use vcp_core::{AppContext, StreamEvent};
use vcp_llm::ChatRequest;

use super::handlers::outcome_record;

const EVENT_BUFFER: usize = 64;

/// Identity shared by every chunk of one response.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkMeta {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_owned(),
        }
    }

    /// The `data:` payload for one event.
    pub fn payload(&self, event: &StreamEvent) -> String {
        match event {
            StreamEvent::Delta { text } => json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [{
                    "index": 0,
                    "delta": {"content": text},
                    "finish_reason": null
                }]
            })
            .to_string(),
            StreamEvent::Marker(marker) => marker.as_str().to_owned(),
            StreamEvent::Error { message } => json!({ "error": message }).to_string(),
            StreamEvent::Finished => "[DONE]".to_owned(),
        }
    }
}

/// Start orchestrating `request` and return the client-facing stream.
pub fn stream_chat(
    ctx: Arc<AppContext>,
    request: ChatRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let meta = ChunkMeta::new(&request.model);

    tokio::spawn(async move {
        match ctx.orchestrator().run_stream(&request, tx).await {
            Ok(outcome) => {
                ctx.debug_log().record("response", &outcome_record(&outcome)).await;
            }
            // Already reported in-band.
            Err(e) => debug!(error = %e, "streamed request failed upstream"),
        }
    });

    let events = futures_util::stream::unfold((rx, meta), |(mut rx, meta)| async move {
        let event = rx.recv().await?;
        let sse = Event::default().data(meta.payload(&event));
        Some((Ok::<_, Infallible>(sse), (rx, meta)))
    });
    Sse::new(events)
}
