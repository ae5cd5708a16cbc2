//! Long-running services for the VCP runtime.
//!
//! - [`static_scheduler`] -- cron-driven refresh of static placeholder plugins
//! - [`api`] -- the axum relay (`/v1/chat/completions`, `/health`) and
//!   service plugin routes (requires the `api` feature, on by default)

pub mod error;
pub mod static_scheduler;

#[cfg(feature = "api")]
pub mod api;

pub use error::{Result, ServiceError};
pub use static_scheduler::StaticScheduler;
