//! In-process plugin interfaces.
//!
//! Message preprocessors are compiled into the binary and selected by the
//! `entryPoint.script` name in their manifest. [`PreprocessorCatalog`] maps
//! those names to implementations; which ones run, and in what order, is
//! decided by the manifests on disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use vcp_types::ChatMessage;

use crate::config::ResolvedPluginConfig;
use crate::error::PluginError;
use crate::preprocessors::ImageStripper;

/// Transforms the conversation before it is sent upstream.
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    /// Return the rewritten conversation. On error the caller keeps the
    /// conversation it passed in.
    async fn process_messages(
        &self,
        messages: Vec<ChatMessage>,
        config: &ResolvedPluginConfig,
    ) -> Result<Vec<ChatMessage>, PluginError>;

    /// Release resources at process shutdown.
    async fn shutdown(&self) {}
}

/// Named [`MessagePreprocessor`] implementations available to manifests.
#[derive(Clone, Default)]
pub struct PreprocessorCatalog {
    entries: HashMap<String, Arc<dyn MessagePreprocessor>>,
}

impl PreprocessorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in preprocessors.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(ImageStripper::NAME, Arc::new(ImageStripper));
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, imp: Arc<dyn MessagePreprocessor>) {
        self.entries.insert(name.into(), imp);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessagePreprocessor>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
