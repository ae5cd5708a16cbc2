//! Application bootstrap and dependency wiring.
//!
//! [`AppContext`] builds every core component from a [`Config`]: the
//! plugin registry, the upstream provider, the optional sandbox, the
//! substitution engine and the orchestrator. The server and CLI crates
//! only ever talk to the core through it.
//!
//! ```rust,ignore
//! use vcp_core::bootstrap::AppContext;
//!
//! let ctx = AppContext::new(config)?;
//! let request = ctx.prepare(request).await;
//! let outcome = ctx.orchestrator().run(&request).await?;
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};
use vcp_llm::{ChatRequest, OpenAiCompatProvider, Provider, ProviderConfig};
use vcp_platform::{Environment, NativeEnvironment, NativeProcessSpawner, ProcessSpawner};
use vcp_plugin::registry::missing_imports;
use vcp_plugin::{PluginRegistry, RegistryOptions, RuntimeContext};
use vcp_types::Config;

use crate::debug_log::DebugLog;
use crate::error::{CoreError, Result};
use crate::orchestrator::Orchestrator;
use crate::sandbox::Sandbox;
use crate::substitution::SubstitutionEngine;

/// Fully initialized core.
pub struct AppContext {
    config: Config,
    registry: Arc<PluginRegistry>,
    provider: Arc<dyn Provider>,
    sandbox: Option<Arc<Sandbox>>,
    substitution: Arc<SubstitutionEngine>,
    orchestrator: Arc<Orchestrator>,
    debug_log: DebugLog,
}

impl AppContext {
    /// Wire the core against the real process environment, real
    /// subprocesses and the configured upstream.
    pub fn new(config: Config) -> Result<Self> {
        let provider = Arc::new(OpenAiCompatProvider::new(ProviderConfig::from(&config.upstream)));
        Self::with_parts(
            config,
            Arc::new(NativeEnvironment),
            Arc::new(NativeProcessSpawner),
            provider,
        )
    }

    /// Wire the core from explicit collaborators.
    pub fn with_parts(
        config: Config,
        env: Arc<dyn Environment>,
        spawner: Arc<dyn ProcessSpawner>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self> {
        info!("bootstrapping application context");

        let project_base_path = match &config.plugins.project_base_path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let mut options = RegistryOptions::new(env.clone(), spawner);
        options.context = RuntimeContext {
            project_base_path,
            server_port: config.server.port,
        };
        options.preprocessor_order = config.plugins.preprocessors.clone();

        let registry = Arc::new(PluginRegistry::load(&config.plugins.dir, options)?);
        for name in missing_imports(&registry) {
            warn!(plugin = %name, "importConfig references a plugin that is not loaded");
        }
        debug!(plugins = registry.len(), "plugin registry ready");

        let sandbox = config
            .sandbox
            .enabled
            .then(|| Arc::new(Sandbox::new(&config.sandbox, Some(registry.clone()))));

        let mut substitution =
            SubstitutionEngine::new(registry.clone(), env, config.substitution.clone());
        let mut orchestrator =
            Orchestrator::new(provider.clone(), registry.clone(), config.orchestration.clone());
        if let Some(sandbox) = &sandbox {
            substitution = substitution.with_tools_api(sandbox.usage_guide());
            orchestrator = orchestrator
                .with_sandbox(sandbox.clone())
                .map_err(|e| CoreError::Config(format!("invalid sandbox fence label: {e}")))?;
            info!(label = sandbox.fence_label(), "code execution sandbox enabled");
        }

        let debug_log = DebugLog::new(config.debug_log_dir.clone(), config.debug);

        Ok(Self {
            config,
            registry,
            provider,
            sandbox,
            substitution: Arc::new(substitution),
            orchestrator: Arc::new(orchestrator),
            debug_log,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn sandbox(&self) -> Option<&Arc<Sandbox>> {
        self.sandbox.as_ref()
    }

    pub fn substitution(&self) -> &Arc<SubstitutionEngine> {
        &self.substitution
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.debug_log
    }

    /// Turn a client request into what is sent upstream: default model,
    /// preprocessors, then placeholder expansion, so text a preprocessor
    /// inserts is expanded too.
    pub async fn prepare(&self, mut request: ChatRequest) -> ChatRequest {
        if request.model.is_empty() {
            request.model = self.config.upstream.default_model.clone();
        }
        let messages = self.registry.preprocess(request.messages).await;
        let ctx = self.substitution.context();
        request.messages = self.substitution.expand_messages(messages, &ctx);
        request
    }

    /// Let in-process plugins release resources.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
