//! Streaming orchestration.
//!
//! Chunks are relayed as they arrive and accumulated on the side. Only
//! after a stream ends is its text scanned. A detected invocation injects a
//! [`Marker`](super::Marker), runs, and opens a follow-up stream. By default
//! one follow-up is made and its text is not scanned again;
//! `stream_follow_up_rounds` raises that, bounded by `max_rounds`.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info};
use vcp_llm::{ChatRequest, ProviderError, StreamChunk};
use vcp_types::ChatMessage;

use super::{OrchestrationOutcome, Orchestrator, StreamEvent, Termination, append_turn};

const CHUNK_BUFFER: usize = 64;

impl Orchestrator {
    /// Stream a request into `events`, ending with [`StreamEvent::Finished`].
    ///
    /// A failure of the first upstream call is returned as an error after
    /// an [`StreamEvent::Error`] has been sent.
    pub async fn run_stream(
        &self,
        request: &ChatRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<OrchestrationOutcome, ProviderError> {
        let started = Instant::now();
        let limit = self.max_rounds();
        let follow_ups = self.config.stream_follow_up_rounds;
        let mut messages = request.messages.clone();

        let mut reply = match self.stream_once(&request.with_messages(messages.clone()), &events).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "upstream stream failed");
                send(&events, StreamEvent::Error { message: e.to_string() }).await;
                send(&events, StreamEvent::Finished).await;
                return Err(e);
            }
        };
        let mut rounds = 1;
        let mut content = String::new();
        let mut follow_ups_done = 0;

        let termination = loop {
            append_turn(&mut content, &reply);

            if follow_ups_done >= follow_ups {
                break Termination::Completed;
            }
            let Some(invocation) = self.detect(&reply) else {
                break Termination::Completed;
            };
            if rounds >= limit {
                info!(rounds, "round limit reached with pending invocation");
                break Termination::RoundLimit;
            }

            send(&events, StreamEvent::Marker(invocation.marker())).await;
            debug!(round = rounds, marker = invocation.marker().as_str(), "executing invocation");
            let execution = self.execute(&invocation).await;
            if self.config.show_tool_output {
                let visible = execution.visible();
                content.push_str(&visible);
                send(&events, StreamEvent::Delta { text: visible }).await;
            }
            messages.push(ChatMessage::assistant(std::mem::take(&mut reply)));
            messages.push(ChatMessage::user(execution.message()));

            rounds += 1;
            follow_ups_done += 1;
            match self.stream_once(&request.with_messages(messages.clone()), &events).await {
                Ok(text) => reply = text,
                Err(e) => {
                    error!(round = rounds, error = %e, "follow-up stream failed");
                    send(&events, StreamEvent::Error { message: e.to_string() }).await;
                    break Termination::UpstreamFailure {
                        message: e.to_string(),
                    };
                }
            }
        };

        send(&events, StreamEvent::Finished).await;
        if !reply.is_empty() {
            messages.push(ChatMessage::assistant(reply));
        }
        info!(
            rounds,
            elapsed_ms = started.elapsed().as_millis() as u64,
            termination = ?termination,
            "streaming orchestration finished"
        );
        Ok(OrchestrationOutcome {
            content,
            rounds,
            messages,
            termination,
            response: None,
        })
    }

    /// One upstream stream: relay each delta and return the full text.
    async fn stream_once(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String, ProviderError> {
        let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
        let upstream = self.provider.complete_stream(request, tx);

        let relay = async {
            let mut text = String::new();
            while let Some(chunk) = rx.recv().await {
                if let StreamChunk::TextDelta { text: delta } = chunk {
                    text.push_str(&delta);
                    send(events, StreamEvent::Delta { text: delta }).await;
                }
            }
            text
        };

        let (result, text) = tokio::join!(upstream, relay);
        result.map(|()| text)
    }
}

/// Send to the client, ignoring a departed receiver.
async fn send(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    if events.send(event).await.is_err() {
        debug!("stream client went away");
    }
}
