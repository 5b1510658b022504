//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod agent;
pub mod config;
pub mod providers;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use clawcore::config::Config;

#[derive(Parser)]
#[command(name = "clawcore")]
#[command(version)]
#[command(about = "Execution core for LLM agent runtimes", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.clawcore/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent request against the configured providers
    Agent {
        /// Message to process
        #[arg(short, long)]
        message: String,
        /// Tool profile to apply
        #[arg(long)]
        tools: Option<String>,
        /// Print the full run output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List configured provider profiles and role defaults
    Providers,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check the config file for unknown keys and invalid values
    Check,
}

/// Config from `--config` or the default location.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load().context("Failed to load configuration"),
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Fall back to default logging if the config cannot be read; the
    // command itself reports the load error.
    let logging_cfg = load_config(cli.config.as_ref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = clawcore::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            println!("clawcore {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Agent {
            message,
            tools,
            json,
        }) => {
            agent::cmd_agent(cli.config.as_ref(), message, tools, json).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(cli.config.as_ref(), action)?;
        }
        Some(Commands::Providers) => {
            providers::cmd_providers(cli.config.as_ref())?;
        }
    }
    Ok(())
}
