//! Multi-round tool orchestration.
//!
//! ```text
//! AwaitingModel
//!   |
//!   v
//! ScanningResponse --(code block)--> ExecutingCode --+
//!   |            \                                   |
//!   |             (tool block)--> ExecutingTools ----+--> resubmit --> AwaitingModel
//!   v
//! Done (no invocation, round limit, or upstream failure)
//! ```
//!
//! Fenced code is checked before tool-call blocks. Requests found in one
//! response run sequentially, in order, and their results go back to the
//! model as a single user message. A failing tool never aborts the request;
//! its error text is what the model sees.
//!
//! [`Orchestrator::run`] drives a buffered exchange and
//! [`Orchestrator::run_stream`] a streaming one.

mod buffered;
pub mod format;
mod streaming;

use std::sync::Arc;

use tracing::debug;
use vcp_llm::{ChatResponse, Provider};
use vcp_plugin::PluginRegistry;
use vcp_types::ChatMessage;
use vcp_types::config::OrchestrationConfig;

use crate::code_blocks::CodeBlockDetector;
use crate::protocol::{ToolCallRequest, parse_tool_calls};
use crate::sandbox::Sandbox;

/// Something the model asked for in its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Code(Vec<String>),
    Tools(Vec<ToolCallRequest>),
}

impl Invocation {
    pub fn marker(&self) -> Marker {
        match self {
            Invocation::Code(_) => Marker::CodeExecution,
            Invocation::Tools(_) => Marker::ToolCallDetected,
        }
    }
}

/// In-band signal injected into a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    CodeExecution,
    ToolCallDetected,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::CodeExecution => "[CODE_EXECUTION]",
            Marker::ToolCallDetected => "[TOOL_CALL_DETECTED]",
        }
    }
}

/// Events produced while streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text to relay to the client verbatim.
    Delta { text: String },
    Marker(Marker),
    /// An upstream failure after the stream started.
    Error { message: String },
    Finished,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The last reply asked for nothing more.
    Completed,
    /// The reply still asked for tools but the round budget was spent.
    RoundLimit,
    /// A follow-up upstream call failed; the content is partial.
    UpstreamFailure { message: String },
}

/// Final result of one orchestrated request.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    /// Assistant text of every round, joined.
    pub content: String,
    /// Upstream calls issued.
    pub rounds: u32,
    /// Conversation including the synthetic turns.
    pub messages: Vec<ChatMessage>,
    pub termination: Termination,
    /// First upstream response with its content replaced by `content`.
    /// Absent in streaming mode.
    pub response: Option<ChatResponse>,
}

/// Results of one execution step.
#[derive(Debug, Clone, Default)]
pub(crate) struct Execution {
    /// One formatted result per request, in order.
    pub results: Vec<String>,
}

impl Execution {
    /// The user message fed back upstream.
    pub fn message(&self) -> String {
        format::join_results(&self.results)
    }

    /// The results rendered for a client that asked to see them.
    pub fn visible(&self) -> String {
        self.results.iter().map(|r| format::visible_result(r)).collect()
    }
}

/// Runs the detect, execute, resubmit loop against one upstream.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<PluginRegistry>,
    sandbox: Option<Arc<Sandbox>>,
    code_blocks: Option<CodeBlockDetector>,
    config: OrchestrationConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<PluginRegistry>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            sandbox: None,
            code_blocks: None,
            config,
        }
    }

    /// Enable fenced code execution.
    pub fn with_sandbox(mut self, sandbox: Arc<Sandbox>) -> Result<Self, regex::Error> {
        self.code_blocks = Some(CodeBlockDetector::new(sandbox.fence_label())?);
        self.sandbox = Some(sandbox);
        Ok(self)
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Upstream calls allowed per request, never less than one.
    pub(crate) fn max_rounds(&self) -> u32 {
        self.config.max_rounds.max(1)
    }

    /// What, if anything, a reply asks for. Code wins over tool calls.
    pub fn detect(&self, reply: &str) -> Option<Invocation> {
        if let Some(detector) = &self.code_blocks {
            let blocks = detector.find(reply);
            if !blocks.is_empty() {
                return Some(Invocation::Code(blocks));
            }
        }
        let calls = parse_tool_calls(reply);
        (!calls.is_empty()).then_some(Invocation::Tools(calls))
    }

    pub(crate) async fn execute(&self, invocation: &Invocation) -> Execution {
        let mut execution = Execution::default();
        match invocation {
            Invocation::Tools(calls) => {
                for call in calls {
                    debug!(tool = %call.tool_name, args = call.args.len(), "executing tool call");
                    let result = self
                        .registry
                        .invoke(&call.tool_name, &call.arguments())
                        .await;
                    execution
                        .results
                        .push(format::tool_result(&call.tool_name, &result));
                }
            }
            Invocation::Code(blocks) => {
                for block in blocks {
                    let text = match &self.sandbox {
                        Some(sandbox) => {
                            let outcome = sandbox.execute(block, sandbox.timeout()).await;
                            format::code_result(&outcome)
                        }
                        None => "code execution failed: code execution is disabled".to_owned(),
                    };
                    execution.results.push(text);
                }
            }
        }
        execution
    }
}

/// Append one finished turn to the running answer.
pub(crate) fn append_turn(content: &mut String, reply: &str) {
    if reply.is_empty() {
        return;
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(reply);
}
