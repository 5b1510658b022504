//! Agent command handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use clawcore::agent::{AgentEngine, AgentInput, TracingSink};
use clawcore::config::Config;
use clawcore::log_component;
use clawcore::providers::{register_configured, ProviderManager};
use clawcore::tools::{EchoTool, ToolRegistry};
use clawcore::utils::metrics::RunMetrics;

/// Providers from config, registered and initialized.
pub(crate) fn build_providers(config: &Config) -> Result<ProviderManager> {
    let manager = ProviderManager::from_config(&config.providers);
    let count = register_configured(&manager, &config.providers.entries)
        .context("Failed to register providers")?;
    if count == 0 {
        bail!(
            "No enabled providers configured. Add an entry under providers.entries in {}",
            Config::path().display()
        );
    }
    manager.initialize()?;
    Ok(manager)
}

/// Single-message agent run.
pub(crate) async fn cmd_agent(
    config_path: Option<&PathBuf>,
    message: String,
    tools: Option<String>,
    json: bool,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let manager = build_providers(&config)?;

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));

    let metrics = Arc::new(RunMetrics::new());
    let engine = AgentEngine::new(&config, Arc::new(manager), Arc::new(registry))
        .with_sink(Arc::new(TracingSink))
        .with_sink(metrics.clone());

    let mut input = AgentInput::new("cli:local", "cli", &message).with_chat_id(Some("local"));
    if let Some(ref profile) = tools {
        input = input.with_tool_policy(profile);
    }

    let output = engine.execute(input).await;
    let summary = metrics.summary();
    log_component!(debug, "cli", "run finished", summary = summary.as_str());

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", output.response);
    }

    if let Some(err) = output.error {
        if !json {
            eprintln!("Error: {}", err);
        }
        std::process::exit(1);
    }
    Ok(())
}
