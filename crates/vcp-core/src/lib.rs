//! Orchestration core of the VCP runtime.
//!
//! Sits between a chat client and the upstream model: expands prompt
//! placeholders, relays the request, and when the model answers with a
//! tool-call block or a fenced script, runs it and resubmits until the
//! model is done.
//!
//! - [`protocol`] -- tool-call markup parser and renderer
//! - [`code_blocks`] -- fenced script detection
//! - [`substitution`] -- placeholder expansion
//! - [`sandbox`] -- embedded Rhai script execution
//! - [`orchestrator`] -- the buffered and streaming loops
//! - [`bootstrap`] -- [`AppContext`](bootstrap::AppContext) wiring

pub mod bootstrap;
pub mod code_blocks;
pub mod debug_log;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod sandbox;
pub mod substitution;

pub use bootstrap::AppContext;
pub use error::{CoreError, Result, SandboxError};
pub use orchestrator::{
    Invocation, Marker, OrchestrationOutcome, Orchestrator, StreamEvent, Termination,
};
pub use protocol::{ToolCallRequest, parse_tool_calls, render_tool_calls};
pub use sandbox::{Sandbox, SandboxOutcome};
pub use substitution::{SubstitutionContext, SubstitutionEngine};
