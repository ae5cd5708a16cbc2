//! The plugin registry.
//!
//! [`PluginRegistry`] owns the manifest table, the static placeholder cache
//! and the active message preprocessors. It is built once at startup and
//! shared behind an `Arc`; the manifest table is immutable afterwards and
//! the placeholder cache is only written by static refreshes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use vcp_platform::{Environment, ProcessError, ProcessRequest, ProcessSpawner};
use vcp_types::ChatMessage;

use crate::config::{ConfigResolver, ResolvedPluginConfig};
use crate::description::build_description;
use crate::envelope::{PluginInvocationResult, excerpt, interpret_output};
use crate::error::{PluginError, Result};
use crate::loader::load_manifests;
use crate::manifest::{PluginKind, PluginManifest, Protocol, normalize_placeholder};
use crate::traits::{MessagePreprocessor, PreprocessorCatalog};

/// Token that disables preprocessing for a conversation.
pub const SKIP_PREPROCESSING_TOKEN: &str = "{{ShowBase64}}";

/// Values the host exports to every plugin process.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Exported as `PROJECT_BASE_PATH`.
    pub project_base_path: PathBuf,
    /// Exported as `SERVER_PORT`.
    pub server_port: u16,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            project_base_path: std::env::current_dir().unwrap_or_default(),
            server_port: 6005,
        }
    }
}

/// Collaborators the registry needs to run plugins.
#[derive(Clone)]
pub struct RegistryOptions {
    pub env: Arc<dyn Environment>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub context: RuntimeContext,
    pub preprocessors: PreprocessorCatalog,
    /// Explicit preprocessor order by plugin name; load order when `None`.
    pub preprocessor_order: Option<Vec<String>>,
}

impl RegistryOptions {
    pub fn new(env: Arc<dyn Environment>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            env,
            spawner,
            context: RuntimeContext::default(),
            preprocessors: PreprocessorCatalog::with_builtins(),
            preprocessor_order: None,
        }
    }
}

#[derive(Debug, Clone)]
struct StaticEntry {
    value: String,
    /// `false` while the value is still an unavailable marker.
    good: bool,
}

struct ActivePreprocessor {
    name: String,
    imp: Arc<dyn MessagePreprocessor>,
    config: ResolvedPluginConfig,
}

/// Loaded plugins and their shared state.
pub struct PluginRegistry {
    plugins: HashMap<String, PluginManifest>,
    order: Vec<String>,
    descriptions: BTreeMap<String, String>,
    static_values: RwLock<HashMap<String, StaticEntry>>,
    resolver: ConfigResolver,
    spawner: Arc<dyn ProcessSpawner>,
    context: RuntimeContext,
    preprocessors: Vec<ActivePreprocessor>,
}

impl PluginRegistry {
    /// Scan `dir` and build a registry from whatever loads.
    pub fn load(dir: &Path, options: RegistryOptions) -> std::io::Result<Self> {
        let report = load_manifests(dir)?;
        info!(
            loaded = report.manifests.len(),
            skipped = report.skipped.len(),
            dir = %dir.display(),
            "plugin scan complete"
        );
        Ok(Self::from_manifests(report.manifests, options))
    }

    /// Build a registry from already-parsed manifests. Later duplicates of
    /// a name are dropped.
    pub fn from_manifests(manifests: Vec<PluginManifest>, options: RegistryOptions) -> Self {
        let resolver = ConfigResolver::new(options.env.clone());
        let mut plugins = HashMap::new();
        let mut order = Vec::new();
        let mut descriptions = BTreeMap::new();

        for manifest in manifests {
            if plugins.contains_key(&manifest.name) {
                warn!(plugin = %manifest.name, "duplicate plugin name, skipping");
                continue;
            }
            if manifest.enabled
                && let Some(text) = build_description(&manifest)
            {
                descriptions.insert(manifest.name.clone(), text);
            }
            order.push(manifest.name.clone());
            plugins.insert(manifest.name.clone(), manifest);
        }

        let mut registry = Self {
            plugins,
            order,
            descriptions,
            static_values: RwLock::new(HashMap::new()),
            resolver,
            spawner: options.spawner,
            context: options.context,
            preprocessors: Vec::new(),
        };
        registry.preprocessors =
            registry.activate_preprocessors(&options.preprocessors, options.preprocessor_order);
        registry
    }

    fn activate_preprocessors(
        &self,
        catalog: &PreprocessorCatalog,
        order: Option<Vec<String>>,
    ) -> Vec<ActivePreprocessor> {
        let names = order.unwrap_or_else(|| {
            self.enabled_of_kind(PluginKind::MessagePreprocessor)
                .map(|m| m.name.clone())
                .collect()
        });

        let mut active = Vec::new();
        for name in names {
            let Some(manifest) = self
                .plugins
                .get(&name)
                .filter(|m| m.enabled && m.kind == PluginKind::MessagePreprocessor)
            else {
                warn!(plugin = %name, "preprocessor not loaded or not enabled");
                continue;
            };
            let Some(imp) = manifest.implementation().and_then(|i| catalog.get(i)) else {
                warn!(
                    plugin = %name,
                    implementation = ?manifest.implementation(),
                    "no registered preprocessor implementation"
                );
                continue;
            };
            active.push(ActivePreprocessor {
                name,
                imp,
                config: self.resolver.resolve(manifest),
            });
        }
        active
    }

    // -----------------------------------------------------------------------
    // Manifest table
    // -----------------------------------------------------------------------

    pub fn get(&self, name: &str) -> Option<&PluginManifest> {
        self.plugins.get(name)
    }

    /// All manifests in load order, disabled ones included.
    pub fn manifests(&self) -> impl Iterator<Item = &PluginManifest> {
        self.order.iter().filter_map(|n| self.plugins.get(n))
    }

    pub fn enabled_of_kind(&self, kind: PluginKind) -> impl Iterator<Item = &PluginManifest> {
        self.manifests()
            .filter(move |m| m.enabled && m.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Capability descriptions keyed by plugin name.
    pub fn descriptions(&self) -> &BTreeMap<String, String> {
        &self.descriptions
    }

    pub fn resolve_config(&self, name: &str) -> Option<ResolvedPluginConfig> {
        self.plugins.get(name).map(|m| self.resolver.resolve(m))
    }

    /// Environment for a plugin process: resolved config, imported keys
    /// of other plugins and the fixed host entries.
    pub fn plugin_env(&self, manifest: &PluginManifest) -> HashMap<String, String> {
        let mut env: HashMap<String, String> =
            self.resolver.resolve(manifest).to_env().into_iter().collect();

        for import in &manifest.import_config {
            let value = self
                .resolve_config(&import.plugin)
                .and_then(|cfg| cfg.get(&import.key).map(|v| v.to_env_string()));
            match value {
                Some(v) => {
                    env.insert(import.env.clone(), v);
                }
                None => debug!(
                    plugin = %manifest.name,
                    source = %import.plugin,
                    key = %import.key,
                    "imported config value not available"
                ),
            }
        }

        env.insert(
            "PROJECT_BASE_PATH".into(),
            self.context.project_base_path.display().to_string(),
        );
        env.insert("SERVER_PORT".into(), self.context.server_port.to_string());
        env.insert("PYTHONIOENCODING".into(), "utf-8".into());
        env
    }

    // -----------------------------------------------------------------------
    // Synchronous plugins
    // -----------------------------------------------------------------------

    /// Run a synchronous plugin; failures become [`PluginInvocationResult::Failure`].
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> PluginInvocationResult {
        let started = Instant::now();
        let result = self.try_invoke(name, args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(plugin = %name, elapsed_ms, "plugin invocation succeeded"),
            Err(e) => warn!(plugin = %name, elapsed_ms, error = %e, "plugin invocation failed"),
        }
        result.into()
    }

    pub async fn try_invoke(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let manifest = self.runnable(name, PluginKind::Synchronous)?;
        if manifest.communication.protocol != Protocol::Stdio {
            return Err(PluginError::UnsupportedProtocol {
                plugin: name.to_owned(),
                protocol: "direct".into(),
            });
        }

        let mut request = self.process_request(manifest)?;
        if let Some(input) = stdin_payload(manifest, args)? {
            request = request.stdin(input);
        }
        let output = self.spawn(manifest, request).await?;
        interpret_output(name, &output)
    }

    // -----------------------------------------------------------------------
    // Static plugins
    // -----------------------------------------------------------------------

    /// Run a static plugin once and return its trimmed stdout.
    pub async fn run_static(&self, name: &str) -> Result<String> {
        let manifest = self.runnable(name, PluginKind::Static)?;
        let request = self.process_request(manifest)?;
        let output = self.spawn(manifest, request).await?;
        if !output.success() {
            return Err(PluginError::ProcessExit {
                plugin: name.to_owned(),
                code: output.exit_code,
                stdout: excerpt(output.stdout.trim()),
                stderr: excerpt(output.stderr.trim()),
            });
        }
        Ok(output.stdout.trim().to_owned())
    }

    /// Run a static plugin and fold the outcome into the placeholder cache.
    pub async fn refresh_static(&self, name: &str) -> Result<String> {
        let outcome = self.run_static(name).await;
        match &outcome {
            Ok(_) => debug!(plugin = %name, "static plugin refreshed"),
            Err(e) => warn!(plugin = %name, error = %e, "static plugin refresh failed"),
        }
        if let Some(manifest) = self.plugins.get(name) {
            self.record_static(manifest, &outcome);
        }
        outcome
    }

    /// Apply one refresh outcome to every placeholder the plugin declares.
    ///
    /// A good value is only ever replaced by another good value; markers
    /// are written only while no good value exists.
    pub fn record_static(&self, manifest: &PluginManifest, outcome: &Result<String>) {
        let keys = manifest.placeholders();
        if keys.is_empty() {
            debug!(plugin = %manifest.name, "static plugin declares no placeholder");
            return;
        }

        let entry = match outcome {
            Ok(value) if !value.is_empty() => StaticEntry {
                value: value.clone(),
                good: true,
            },
            Ok(_) => StaticEntry {
                value: format!("[{} data currently unavailable]", manifest.name),
                good: false,
            },
            Err(e) => {
                let reason: String = e.to_string().chars().take(100).collect();
                StaticEntry {
                    value: format!("[{} data currently unavailable: {reason}]", manifest.name),
                    good: false,
                }
            }
        };

        let mut cache = self.static_values.write();
        for key in keys {
            let replace = match cache.get(&key) {
                None => true,
                Some(current) => entry.good || (!current.good && outcome.is_err()),
            };
            if replace {
                cache.insert(key, entry.clone());
            }
        }
    }

    /// Cached value for a placeholder (`{{Key}}` or bare `Key`).
    pub fn static_value(&self, placeholder: &str) -> Option<String> {
        self.static_values
            .read()
            .get(&normalize_placeholder(placeholder))
            .map(|e| e.value.clone())
    }

    /// Cached value, or an explicit not-found marker.
    pub fn placeholder_value(&self, placeholder: &str) -> String {
        let key = normalize_placeholder(placeholder);
        self.static_value(&key)
            .unwrap_or_else(|| format!("[Placeholder {key} not found]"))
    }

    /// Placeholders declared by enabled static plugins.
    pub fn static_placeholders(&self) -> Vec<String> {
        self.enabled_of_kind(PluginKind::Static)
            .flat_map(|m| m.placeholders())
            .collect()
    }

    pub fn static_snapshot(&self) -> BTreeMap<String, String> {
        self.static_values
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Preprocessors
    // -----------------------------------------------------------------------

    pub fn preprocessor_names(&self) -> Vec<&str> {
        self.preprocessors.iter().map(|p| p.name.as_str()).collect()
    }

    /// Run the active preprocessors over a conversation.
    ///
    /// A conversation containing [`SKIP_PREPROCESSING_TOKEN`] is passed
    /// through with the token removed. A failing preprocessor is skipped.
    pub async fn preprocess(&self, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        if messages
            .iter()
            .any(|m| m.content.contains(SKIP_PREPROCESSING_TOKEN))
        {
            for m in &mut messages {
                m.map_text(|t| t.replace(SKIP_PREPROCESSING_TOKEN, ""));
            }
            debug!("preprocessing skipped by request");
            return messages;
        }

        for p in &self.preprocessors {
            match p.imp.process_messages(messages.clone(), &p.config).await {
                Ok(out) => messages = out,
                Err(e) => warn!(preprocessor = %p.name, error = %e, "preprocessor failed, keeping input"),
            }
        }
        messages
    }

    /// Give every in-process plugin a chance to clean up.
    pub async fn shutdown(&self) {
        for p in &self.preprocessors {
            p.imp.shutdown().await;
        }
        info!("plugin registry shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn runnable(&self, name: &str, kind: PluginKind) -> Result<&PluginManifest> {
        let manifest = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_owned()))?;
        if !manifest.enabled {
            return Err(PluginError::Disabled(name.to_owned()));
        }
        if manifest.kind != kind {
            return Err(PluginError::WrongKind {
                plugin: name.to_owned(),
                expected: kind.as_str(),
                actual: manifest.kind.as_str(),
            });
        }
        Ok(manifest)
    }

    fn process_request(&self, manifest: &PluginManifest) -> Result<ProcessRequest> {
        let command = manifest.command().ok_or_else(|| PluginError::ExecutionFailed {
            plugin: manifest.name.clone(),
            message: format!("Plugin '{}' has no entry command", manifest.name),
        })?;
        let mut request = ProcessRequest::new(command)
            .envs(self.plugin_env(manifest))
            .timeout(manifest.timeout());
        if !manifest.base_path.as_os_str().is_empty() {
            request = request.cwd(&manifest.base_path);
        }
        Ok(request)
    }

    async fn spawn(
        &self,
        manifest: &PluginManifest,
        request: ProcessRequest,
    ) -> Result<vcp_platform::ProcessOutput> {
        self.spawner.run(request).await.map_err(|e| match e {
            ProcessError::Timeout { timeout_ms, .. } => PluginError::ProcessTimeout {
                plugin: manifest.name.clone(),
                timeout_ms,
            },
            ProcessError::Spawn { source, .. } => PluginError::ExecutionFailed {
                plugin: manifest.name.clone(),
                message: format!("Plugin '{}' could not be started: {source}", manifest.name),
            },
            ProcessError::Io(e) => PluginError::Io(e),
        })
    }
}

/// What a synchronous plugin receives on stdin.
///
/// No arguments means no input. A manifest naming a `stdinArgument` gets
/// that argument's string value raw; everyone else gets the arguments as a
/// JSON object.
fn stdin_payload(manifest: &PluginManifest, args: &Map<String, Value>) -> Result<Option<String>> {
    if args.is_empty() {
        return Ok(None);
    }
    if let Some(key) = &manifest.stdin_argument
        && let Some(Value::String(raw)) = args.get(key)
    {
        return Ok(Some(raw.clone()));
    }
    Ok(Some(serde_json::to_string(args)?))
}

/// Names referenced by `importConfig` that did not load.
pub fn missing_imports(registry: &PluginRegistry) -> HashSet<String> {
    registry
        .manifests()
        .flat_map(|m| m.import_config.iter())
        .filter(|i| registry.get(&i.plugin).is_none())
        .map(|i| i.plugin.clone())
        .collect()
}
