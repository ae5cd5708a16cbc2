//! Service plugins: compiled-in HTTP routes enabled by manifest.
//!
//! A manifest of kind `service` names its implementation in
//! `entryPoint.script`. At startup every enabled service manifest is looked
//! up in the [`ServiceCatalog`] and its routes are merged next to the relay.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, warn};
use vcp_plugin::{PluginKind, PluginRegistry, ResolvedPluginConfig};

/// An in-process plugin contributing HTTP routes.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Routes to merge into the server. `base_path` is the project base
    /// path the plugin may read files relative to.
    fn routes(
        &self,
        registry: Arc<PluginRegistry>,
        config: &ResolvedPluginConfig,
        base_path: &Path,
    ) -> Router;

    /// Release resources at process shutdown.
    async fn shutdown(&self) {}
}

/// Named [`ServicePlugin`] implementations available to manifests.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    entries: HashMap<String, Arc<dyn ServicePlugin>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in services.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(PlaceholderInspector::NAME, Arc::new(PlaceholderInspector));
        catalog
    }

    pub fn register(&mut self, name: impl Into<String>, imp: Arc<dyn ServicePlugin>) {
        self.entries.insert(name.into(), imp);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServicePlugin>> {
        self.entries.get(name).cloned()
    }
}

/// Services mounted for one server run.
pub struct MountedServices {
    router: Router,
    active: Vec<(String, Arc<dyn ServicePlugin>)>,
}

impl MountedServices {
    /// Mount every enabled service manifest that has an implementation.
    pub fn mount(catalog: &ServiceCatalog, registry: &Arc<PluginRegistry>) -> Self {
        let base_path = registry.context().project_base_path.clone();
        let mut router = Router::new();
        let mut active = Vec::new();

        for manifest in registry.enabled_of_kind(PluginKind::Service) {
            let Some(imp) = manifest.implementation().and_then(|i| catalog.get(i)) else {
                warn!(
                    plugin = %manifest.name,
                    implementation = ?manifest.implementation(),
                    "no registered service implementation"
                );
                continue;
            };
            let config = registry
                .resolve_config(&manifest.name)
                .unwrap_or_default();
            router = router.merge(imp.routes(registry.clone(), &config, &base_path));
            info!(plugin = %manifest.name, "service plugin mounted");
            active.push((manifest.name.clone(), imp));
        }

        Self { router, active }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.active.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub async fn shutdown(&self) {
        for (name, imp) in &self.active {
            imp.shutdown().await;
            info!(plugin = %name, "service plugin shut down");
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in: PlaceholderInspector
// ---------------------------------------------------------------------------

/// Serves the current static placeholder cache at `GET /placeholders`.
pub struct PlaceholderInspector;

impl PlaceholderInspector {
    pub const NAME: &'static str = "PlaceholderInspector";
}

#[async_trait]
impl ServicePlugin for PlaceholderInspector {
    fn routes(
        &self,
        registry: Arc<PluginRegistry>,
        _config: &ResolvedPluginConfig,
        _base_path: &Path,
    ) -> Router {
        Router::new()
            .route("/placeholders", get(list_placeholders))
            .with_state(registry)
    }
}

async fn list_placeholders(
    State(registry): State<Arc<PluginRegistry>>,
) -> Json<BTreeMap<String, String>> {
    Json(registry.static_snapshot())
}
