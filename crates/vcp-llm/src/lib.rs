//! Upstream model client.
//!
//! The relay only ever talks to one OpenAI-compatible endpoint, so this
//! crate is a single [`Provider`] trait with one HTTP implementation,
//! [`OpenAiCompatProvider`], plus the request/response and SSE types.
//! The orchestration loop depends on the trait so tests can script
//! upstream replies without a server.

pub mod config;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod sse;
pub mod types;

pub use config::ProviderConfig;
pub use error::{ProviderError, Result};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, StreamChunk, Usage};
