//! Embedded script sandbox.
//!
//! Model-authored code runs in a Rhai engine created from `Engine::new_raw`
//! with only the standard package: no module resolver, no `eval`, no file
//! or process bindings. Output from `print` and `debug` is captured instead
//! of reaching the host's stdio.
//!
//! Every enabled synchronous plugin is exposed as a script function of the
//! same name, plus a generic `call_tool(name, args)`. Both go through the
//! [`PluginRegistry`] exactly like a tool-call block does.
//!
//! The wall-clock budget is enforced twice: an operation-progress hook
//! aborts the script once the deadline passes, and the caller stops waiting
//! at the same deadline. Giving up cancels any plugin call the script is
//! blocked in, which drops the call and kills its process group. This is a
//! convenience restriction for trusted models, not a security boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vcp_plugin::{PluginKind, PluginRegistry};
use vcp_types::config::SandboxConfig;

use crate::error::SandboxError;

const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_COLLECTION_SIZE: usize = 100_000;
const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;

/// Name of the generic plugin bridge inside scripts.
pub const CALL_TOOL_FN: &str = "call_tool";

/// Result of one script execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Value of the script's final expression, absent for `()`.
    pub return_value: Option<Value>,
    #[serde(serialize_with = "error_text")]
    pub error: Option<SandboxError>,
    pub duration_ms: u64,
}

fn error_text<S: Serializer>(error: &Option<SandboxError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Default)]
struct Captured {
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
}

/// Runs scripts with a deadline and an optional plugin bridge.
pub struct Sandbox {
    fence_label: String,
    timeout: Duration,
    max_operations: Option<u64>,
    registry: Option<Arc<PluginRegistry>>,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig, registry: Option<Arc<PluginRegistry>>) -> Self {
        Self {
            fence_label: config.fence_label.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_operations: config.max_operations,
            registry,
        }
    }

    pub fn fence_label(&self) -> &str {
        &self.fence_label
    }

    /// Default budget for one script.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `script`, giving up after `timeout`.
    ///
    /// Must be called from within a Tokio runtime; plugin calls made by the
    /// script are driven on that runtime.
    pub async fn execute(&self, script: &str, timeout: Duration) -> SandboxOutcome {
        let started = Instant::now();
        let captured = Captured::default();
        let cancel = CancellationToken::new();
        // Fires on every exit path, including this future being dropped.
        let _cancel_on_exit = cancel.clone().drop_guard();
        let engine = self.build_engine(&captured, started + timeout, cancel.clone());

        let script = script.to_owned();
        let seconds = timeout.as_secs();
        let task = tokio::task::spawn_blocking(move || run_script(&engine, &script, seconds));

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SandboxError::Join(e.to_string())),
            Err(_) => {
                cancel.cancel();
                Err(SandboxError::Timeout { seconds })
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let stdout = captured.stdout.lock().clone();
        let stderr = captured.stderr.lock().clone();
        match result {
            Ok(return_value) => {
                info!(duration_ms, "script finished");
                SandboxOutcome {
                    success: true,
                    stdout,
                    stderr,
                    return_value,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                warn!(duration_ms, error = %e, "script failed");
                SandboxOutcome {
                    success: false,
                    stdout,
                    stderr,
                    return_value: None,
                    error: Some(e),
                    duration_ms,
                }
            }
        }
    }

    /// Plugin functions callable by name from a script.
    pub fn script_functions(&self) -> Vec<String> {
        self.registry
            .iter()
            .flat_map(|r| r.enabled_of_kind(PluginKind::Synchronous))
            .map(|m| m.name.clone())
            .filter(|n| is_identifier(n))
            .collect()
    }

    /// Usage notes for the model, bound to `{{VCPToolsAPI}}`.
    pub fn usage_guide(&self) -> String {
        let mut guide = format!(
            "You can run code by answering with a fenced block labelled `{label}`:\n\
             ```{label}\nlet r = call_tool(\"PluginName\", #{{ key: \"value\" }});\nprint(r);\n```\n\
             The block is executed and its output is sent back to you. Use `print` for \
             output; the value of the last expression is returned too. Scripts stop \
             after {secs} seconds and have no file, network or process access.",
            label = self.fence_label,
            secs = self.timeout.as_secs(),
        );
        let functions = self.script_functions();
        if !functions.is_empty() {
            guide.push_str("\nPlugin functions (each takes an optional map of arguments):");
            for name in functions {
                guide.push_str(&format!("\n- {name}(#{{ ... }})"));
            }
        }
        guide
    }

    fn build_engine(
        &self,
        captured: &Captured,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Engine {
        let mut engine = Engine::new_raw();
        engine.register_global_module(StandardPackage::new().as_shared_module());
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");

        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_COLLECTION_SIZE);
        engine.set_max_map_size(MAX_COLLECTION_SIZE);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH / 2);
        if let Some(ops) = self.max_operations {
            engine.set_max_operations(ops);
        }

        let stdout = captured.stdout.clone();
        engine.on_print(move |text| {
            let mut out = stdout.lock();
            out.push_str(text);
            out.push('\n');
        });
        let stderr = captured.stderr.clone();
        engine.on_debug(move |text, _source, _pos| {
            let mut err = stderr.lock();
            err.push_str(text);
            err.push('\n');
        });
        let stop = cancel.clone();
        engine.on_progress(move |_ops| {
            if stop.is_cancelled() || Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        if let Some(registry) = &self.registry {
            let bridge = Bridge {
                registry: registry.clone(),
                handle: Handle::current(),
                cancel,
            };
            register_plugins(&mut engine, &bridge);
        }
        engine
    }
}

fn run_script(engine: &Engine, script: &str, seconds: u64) -> Result<Option<Value>, SandboxError> {
    let ast = engine
        .compile(script)
        .map_err(|e| SandboxError::Runtime(format!("syntax error: {e}")))?;

    let value: Dynamic = engine.eval_ast(&ast).map_err(|e| match *e {
        EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout { seconds },
        other => SandboxError::Runtime(other.to_string()),
    })?;

    if value.is_unit() {
        return Ok(None);
    }
    let json = rhai::serde::from_dynamic::<Value>(&value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(Some(json))
}

/// What a script needs to reach the async registry from its blocking thread.
#[derive(Clone)]
struct Bridge {
    registry: Arc<PluginRegistry>,
    handle: Handle,
    cancel: CancellationToken,
}

impl Bridge {
    fn call(&self, name: &str, args: rhai::Map) -> Result<Dynamic, Box<EvalAltResult>> {
        let args = match rhai::serde::from_dynamic::<Value>(&Dynamic::from_map(args))? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        debug!(plugin = %name, "plugin call from script");
        let result = self.handle.block_on(async {
            tokio::select! {
                // Dropping the invocation kills the plugin's process group.
                _ = self.cancel.cancelled() => Err(format!("plugin {name} abandoned: script stopped")),
                result = self.registry.try_invoke(name, &args) => {
                    result.map_err(|e| format!("plugin {name} failed: {e}"))
                }
            }
        })?;
        rhai::serde::to_dynamic(result)
    }
}

fn register_plugins(engine: &mut Engine, bridge: &Bridge) {
    for manifest in bridge.registry.enabled_of_kind(PluginKind::Synchronous) {
        let name = manifest.name.clone();
        if !is_identifier(&name) {
            debug!(plugin = %name, "not a script identifier, reachable via call_tool only");
            continue;
        }

        let (b, plugin) = (bridge.clone(), name.clone());
        engine.register_fn(name.as_str(), move |args: rhai::Map| b.call(&plugin, args));
        let (b, plugin) = (bridge.clone(), name.clone());
        engine.register_fn(name.as_str(), move || b.call(&plugin, rhai::Map::new()));
    }

    let b = bridge.clone();
    engine.register_fn(CALL_TOOL_FN, move |name: ImmutableString, args: rhai::Map| {
        b.call(name.as_str(), args)
    });
    let b = bridge.clone();
    engine.register_fn(CALL_TOOL_FN, move |name: ImmutableString| {
        b.call(name.as_str(), rhai::Map::new())
    });
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(&SandboxConfig::default(), None)
    }

    #[tokio::test]
    async fn print_is_captured() {
        let out = sandbox().execute("print(1+1)", Duration::from_secs(5)).await;
        assert!(out.success, "{out:?}");
        assert_eq!(out.stdout, "2\n");
        assert_eq!(out.return_value, None);
    }

    #[tokio::test]
    async fn final_expression_is_returned_as_json() {
        let out = sandbox()
            .execute("let x = #{a: 1, b: [true, \"s\"]}; x", Duration::from_secs(5))
            .await;
        assert!(out.success);
        assert_eq!(out.return_value, Some(serde_json::json!({"a": 1, "b": [true, "s"]})));
    }

    #[tokio::test]
    async fn debug_goes_to_stderr() {
        let out = sandbox().execute("debug(\"trace\"); 1", Duration::from_secs(5)).await;
        assert!(out.stderr.contains("trace"));
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let started = Instant::now();
        let out = sandbox().execute("loop { }", Duration::from_secs(1)).await;
        assert!(!out.success);
        assert_eq!(out.error, Some(SandboxError::Timeout { seconds: 1 }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn syntax_and_runtime_errors_are_reported() {
        let out = sandbox().execute("let = ;", Duration::from_secs(5)).await;
        assert!(matches!(out.error, Some(SandboxError::Runtime(ref m)) if m.starts_with("syntax error")));

        let out = sandbox()
            .execute("print(\"before\"); throw \"boom\";", Duration::from_secs(5))
            .await;
        assert!(!out.success);
        assert_eq!(out.stdout, "before\n");
        assert!(out.error.unwrap().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn modules_and_eval_are_unavailable() {
        let out = sandbox()
            .execute("import \"std\" as s; 1", Duration::from_secs(5))
            .await;
        assert!(!out.success);

        let out = sandbox().execute("eval(\"1 + 1\")", Duration::from_secs(5)).await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn operation_cap_stops_script() {
        let config = SandboxConfig {
            max_operations: Some(1_000),
            ..SandboxConfig::default()
        };
        let out = Sandbox::new(&config, None)
            .execute("let i = 0; while i < 1000000 { i += 1; }", Duration::from_secs(5))
            .await;
        assert!(matches!(out.error, Some(SandboxError::Runtime(_))));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("Weather"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("Daily-Note"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn guide_mentions_label() {
        let guide = sandbox().usage_guide();
        assert!(guide.contains("```rhai"));
        assert!(guide.contains("call_tool"));
    }
}
