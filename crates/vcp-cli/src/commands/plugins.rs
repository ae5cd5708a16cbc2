//! `vcp plugins` -- inspect and run plugins.
//!
//! ```text
//! vcp plugins list
//! vcp plugins invoke Randomness -a command=rollDice -a sides=20
//! ```

use clap::Args;
use comfy_table::{Table, presets};
use serde_json::{Map, Value};
use vcp_core::AppContext;
use vcp_plugin::{PluginInvocationResult, PluginKind, PluginManifest};
use vcp_types::Config;

use super::truncate;

/// Arguments for `vcp plugins invoke`.
#[derive(Args)]
pub struct InvokeArgs {
    /// Plugin name as declared in its manifest.
    pub name: String,

    /// Argument as `key=value`; repeatable.
    #[arg(short = 'a', long = "arg", value_parser = parse_key_value)]
    pub args: Vec<(String, String)>,
}

/// Parse a `key=value` pair.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn bootstrap(config: Config) -> anyhow::Result<AppContext> {
    AppContext::new(config).map_err(|e| anyhow::anyhow!("failed to bootstrap app context: {e}"))
}

/// Print every discovered plugin, disabled ones included.
pub fn plugins_list(config: Config) -> anyhow::Result<()> {
    let ctx = bootstrap(config)?;
    let registry = ctx.registry();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(["NAME", "KIND", "ENABLED", "ENTRY", "EXPOSES"]);
    for manifest in registry.manifests() {
        table.add_row([
            manifest.name.clone(),
            manifest.kind.as_str().to_owned(),
            if manifest.enabled { "yes" } else { "no" }.to_owned(),
            truncate(manifest.implementation().unwrap_or("-"), 40),
            truncate(&exposes(manifest), 50),
        ]);
    }

    println!("{table}");
    println!();
    println!("Total: {} plugin(s)", registry.len());
    Ok(())
}

/// What a plugin offers: placeholders for static plugins, commands for
/// synchronous ones.
fn exposes(manifest: &PluginManifest) -> String {
    let items: Vec<String> = match manifest.kind {
        PluginKind::Static => manifest.placeholders(),
        _ => manifest
            .capabilities
            .invocation_commands
            .iter()
            .map(|c| c.command.clone())
            .collect(),
    };
    if items.is_empty() {
        "-".into()
    } else {
        items.join(", ")
    }
}

/// Run one synchronous plugin and print its result.
pub async fn plugins_invoke(config: Config, args: InvokeArgs) -> anyhow::Result<()> {
    let ctx = bootstrap(config)?;
    let arguments: Map<String, Value> = args
        .args
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let result = ctx.registry().invoke(&args.name, &arguments).await;
    ctx.shutdown().await;
    match result {
        PluginInvocationResult::Success { result } => {
            println!("{}", vcp_plugin::envelope::value_text(&result));
            Ok(())
        }
        PluginInvocationResult::Failure { message } => anyhow::bail!(message),
    }
}
