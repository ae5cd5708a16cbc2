//! `vcp sandbox run` -- execute a script in the code sandbox.
//!
//! The script sees the same plugin functions the model would. Captured
//! stdout and stderr are replayed on the terminal; the final expression's
//! value is printed as `=> <json>`.
//!
//! ```text
//! vcp sandbox run script.rhai
//! echo 'print(1 + 1)' | vcp sandbox run -
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use vcp_core::{AppContext, Sandbox, SandboxOutcome};
use vcp_types::Config;

/// Arguments for `vcp sandbox run`.
#[derive(Args)]
pub struct RunArgs {
    /// Script file, or `-` for standard input.
    pub script: PathBuf,

    /// Wall-clock budget in seconds (defaults to `sandbox.timeout_secs`).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the full outcome as JSON instead.
    #[arg(long)]
    pub json: bool,
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut script = String::new();
        std::io::stdin().read_to_string(&mut script)?;
        return Ok(script);
    }
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))
}

/// Run the script and report its outcome. A failed script is an error exit.
pub async fn run(config: Config, args: RunArgs) -> anyhow::Result<()> {
    let script = read_script(&args.script)?;
    let ctx = AppContext::new(config)
        .map_err(|e| anyhow::anyhow!("failed to bootstrap app context: {e}"))?;

    let sandbox = Sandbox::new(&ctx.config().sandbox, Some(ctx.registry().clone()));
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| sandbox.timeout());
    let outcome = sandbox.execute(&script, timeout).await;
    ctx.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", render(&outcome));
        eprint!("{}", outcome.stderr);
    }
    match &outcome.error {
        Some(e) => anyhow::bail!("script failed: {e}"),
        None => Ok(()),
    }
}

/// Terminal form of an outcome's stdout and return value.
fn render(outcome: &SandboxOutcome) -> String {
    let mut out = outcome.stdout.clone();
    if let Some(value) = &outcome.return_value {
        out.push_str(&format!("=> {value}\n"));
    }
    out
}
