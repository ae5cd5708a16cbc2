//! Buffered orchestration: every upstream reply arrives whole.

use std::time::Instant;

use tracing::{debug, error, info};
use vcp_llm::{ChatRequest, ProviderError};
use vcp_types::ChatMessage;

use super::{OrchestrationOutcome, Orchestrator, Termination, append_turn};

impl Orchestrator {
    /// Run a request to completion.
    ///
    /// Fails only when the first upstream call fails. A later failure ends
    /// the loop with [`Termination::UpstreamFailure`] and whatever content
    /// was gathered so far.
    pub async fn run(&self, request: &ChatRequest) -> Result<OrchestrationOutcome, ProviderError> {
        let started = Instant::now();
        let limit = self.max_rounds();
        let mut messages = request.messages.clone();

        let mut response = self.provider.complete(&request.with_messages(messages.clone())).await?;
        let mut rounds = 1;
        let mut reply = response.content();
        let mut content = String::new();

        let termination = loop {
            append_turn(&mut content, &reply);

            let Some(invocation) = self.detect(&reply) else {
                break Termination::Completed;
            };
            if rounds >= limit {
                info!(rounds, "round limit reached with pending invocation");
                break Termination::RoundLimit;
            }

            debug!(round = rounds, marker = invocation.marker().as_str(), "executing invocation");
            let execution = self.execute(&invocation).await;
            if self.config.show_tool_output {
                content.push_str(&execution.visible());
            }
            messages.push(ChatMessage::assistant(std::mem::take(&mut reply)));
            messages.push(ChatMessage::user(execution.message()));

            rounds += 1;
            match self.provider.complete(&request.with_messages(messages.clone())).await {
                Ok(next) => reply = next.content(),
                Err(e) => {
                    error!(round = rounds, error = %e, "upstream call failed, returning partial result");
                    break Termination::UpstreamFailure {
                        message: e.to_string(),
                    };
                }
            }
        };

        if !reply.is_empty() {
            messages.push(ChatMessage::assistant(reply));
        }
        info!(
            rounds,
            elapsed_ms = started.elapsed().as_millis() as u64,
            termination = ?termination,
            "orchestration finished"
        );
        response.set_content(content.clone());
        Ok(OrchestrationOutcome {
            content,
            rounds,
            messages,
            termination,
            response: Some(response),
        })
    }
}
