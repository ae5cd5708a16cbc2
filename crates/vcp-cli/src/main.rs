//! `vcp` -- CLI binary for the VCP tool-call relay.
//!
//! Provides the following subcommands:
//!
//! - `vcp serve` -- Run the chat-completion relay with plugin orchestration.
//! - `vcp plugins list` -- Show discovered plugins.
//! - `vcp plugins invoke` -- Run one synchronous plugin by hand.
//! - `vcp sandbox run` -- Execute a script in the code sandbox.
//! - `vcp config show` -- Print the resolved configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// VCP tool-call relay CLI.
#[derive(Parser)]
#[command(name = "vcp", about = "VCP tool-call relay CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start the relay server.
    Serve(commands::serve::ServeArgs),

    /// Inspect and run plugins.
    Plugins {
        #[command(subcommand)]
        action: PluginsAction,
    },

    /// Run scripts in the code-execution sandbox.
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `vcp plugins`.
#[derive(Subcommand)]
enum PluginsAction {
    /// List all discovered plugins.
    List,

    /// Invoke a synchronous plugin.
    Invoke(commands::plugins::InvokeArgs),
}

/// Subcommands for `vcp sandbox`.
#[derive(Subcommand)]
enum SandboxAction {
    /// Run a script file (`-` reads standard input).
    Run(commands::sandbox::RunArgs),
}

/// Subcommands for `vcp config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the full resolved configuration.
    Show,

    /// Show a specific configuration section.
    Section {
        /// Section name (e.g., "server", "plugins", "sandbox").
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    let default_filter = if cli.verbose || config.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(config, args).await?,
        Commands::Plugins { action } => match action {
            PluginsAction::List => commands::plugins::plugins_list(config)?,
            PluginsAction::Invoke(args) => commands::plugins::plugins_invoke(config, args).await?,
        },
        Commands::Sandbox { action } => match action {
            SandboxAction::Run(args) => commands::sandbox::run(config, args).await?,
        },
        Commands::Config { action } => match action {
            ConfigCmd::Show => commands::config_cmd::config_show(&config),
            ConfigCmd::Section { name } => commands::config_cmd::config_section(&config, &name)?,
        },
    }

    Ok(())
}
