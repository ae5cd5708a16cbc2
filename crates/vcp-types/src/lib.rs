//! # vcp-types
//!
//! Type definitions shared by every VCP crate.
//!
//! - **[`config`]** -- root [`Config`] schema and its sections
//! - **[`message`]** -- OpenAI-style chat messages passed through the relay
//! - **[`error`]** -- [`VcpError`], the top-level error
//! - **[`secret`]** -- [`SecretString`] for API keys and bearer tokens

pub mod config;
pub mod error;
pub mod message;
pub mod secret;

pub use config::Config;
pub use error::{Result, VcpError};
pub use message::{ChatMessage, ContentPart, MessageContent};
pub use secret::SecretString;
