//! `vcp serve` -- run the relay.
//!
//! # Lifecycle
//!
//! ```text
//! 1. Bootstrap AppContext (plugins, upstream, sandbox, substitution)
//! 2. Refresh static placeholders once, then start their cron jobs
//! 3. Serve /v1/chat/completions, /health and service plugin routes
//! 4. On Ctrl+C: stop the scheduler, drain the server, shut plugins down
//! ```

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vcp_core::AppContext;
use vcp_services::StaticScheduler;
use vcp_services::api::{self, services::ServiceCatalog};
use vcp_types::Config;

/// Arguments for the `vcp serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Bind address (overrides `server.host`).
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port (overrides `server.port`).
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Apply command-line overrides to the loaded config.
fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
}

/// Run until Ctrl+C, then shut everything down in order.
pub async fn run(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args);
    info!("starting vcp relay");

    let ctx = Arc::new(
        AppContext::new(config)
            .map_err(|e| anyhow::anyhow!("failed to bootstrap app context: {e}"))?,
    );
    info!(
        plugins = ctx.registry().len(),
        descriptions = ctx.registry().descriptions().len(),
        sandbox = ctx.sandbox().is_some(),
        "app context ready"
    );

    let cancel = CancellationToken::new();
    let jobs = StaticScheduler::new(ctx.registry().clone())
        .start(cancel.clone())
        .await;

    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl+C"),
            }
        })
    };

    let served = api::serve(ctx.clone(), &ServiceCatalog::with_builtins(), cancel.clone()).await;

    cancel.cancel();
    signal.abort();
    for job in jobs {
        if let Err(e) = job.await {
            warn!(error = %e, "refresh job ended abnormally");
        }
    }
    ctx.shutdown().await;
    info!("vcp relay stopped");

    served.map_err(Into::into)
}
