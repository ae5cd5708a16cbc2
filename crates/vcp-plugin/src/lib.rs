//! Plugin subsystem for the VCP runtime.
//!
//! Plugins are directories holding a `plugin-manifest.json`. Four kinds
//! exist (see [`PluginKind`]):
//!
//! - **static** -- a command run at startup and on a cron schedule whose
//!   output fills a prompt placeholder
//! - **synchronous** -- a command run per tool call, fed its arguments on
//!   stdin and answering on stdout
//! - **messagePreprocessor** -- a compiled-in transform of the outgoing
//!   conversation, picked by name from a [`PreprocessorCatalog`]
//! - **service** -- compiled-in HTTP routes, mounted by the server crate
//!
//! The [`PluginRegistry`] ties these together.

pub mod config;
pub mod description;
pub mod envelope;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod preprocessors;
pub mod registry;
pub mod traits;

pub use config::{ConfigResolver, ConfigValue, ResolvedPluginConfig};
pub use envelope::PluginInvocationResult;
pub use error::{PluginError, Result};
pub use manifest::{PluginKind, PluginManifest};
pub use registry::{PluginRegistry, RegistryOptions, RuntimeContext};
pub use traits::{MessagePreprocessor, PreprocessorCatalog};
