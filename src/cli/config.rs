//! Config check command handler.

use std::path::PathBuf;

use anyhow::{Context, Result};

use clawcore::config::validate::{validate_config, validate_semantics, DiagnosticLevel};
use clawcore::config::Config;

use super::ConfigAction;

/// Validate configuration file.
pub(crate) fn cmd_config(config_path: Option<&PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let path = config_path.cloned().unwrap_or_else(Config::path);
            println!("Config file: {}", path.display());

            if !path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(());
            }

            let content = std::fs::read_to_string(&path).context("Failed to read config file")?;

            let raw: serde_json::Value = match serde_json::from_str(&content) {
                Ok(v) => v,
                Err(e) => {
                    println!("[ERROR] Invalid JSON: {}", e);
                    return Ok(());
                }
            };

            let mut diagnostics = validate_config(&raw);
            match Config::load_from_path(&path) {
                Ok(config) => diagnostics.extend(validate_semantics(&config)),
                Err(e) => println!("[ERROR] {}", e),
            }
            for diag in &diagnostics {
                println!("{}", diag);
            }

            let errors = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Error)
                .count();
            let warnings = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Warn)
                .count();

            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
        }
    }
    Ok(())
}
