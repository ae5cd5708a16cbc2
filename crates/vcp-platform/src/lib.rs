//! Platform layer for the VCP runtime.
//!
//! Everything that touches the host process lives here so the plugin and
//! orchestration crates can be tested against in-memory stand-ins:
//!
//! - [`env::Environment`] -- environment variable lookup
//! - [`process::ProcessSpawner`] -- deadline-bounded subprocess execution
//! - [`config_loader`] -- config file discovery, parsing and env overrides

pub mod config_loader;
pub mod env;
pub mod process;

pub use env::{Environment, MapEnvironment, NativeEnvironment};
pub use process::{NativeProcessSpawner, ProcessError, ProcessOutput, ProcessRequest, ProcessSpawner};
