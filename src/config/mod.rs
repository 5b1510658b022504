//! Configuration management for ClawCore
//!
//! Configuration is loaded from `~/.clawcore/config.json` (or an explicit
//! path) with environment variable overrides of the form
//! `CLAWCORE_SECTION_KEY`.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{ClawError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Returns the ClawCore configuration directory path (~/.clawcore)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clawcore")
    }

    /// Returns the path to the config file (~/.clawcore/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                ClawError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        // Agent
        if let Some(v) = env_parse("CLAWCORE_AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = v;
        }
        if let Some(v) = env_parse("CLAWCORE_AGENT_ITERATION_TIMEOUT_SECS") {
            self.agent.iteration_timeout_secs = v;
        }
        if let Some(v) = env_parse("CLAWCORE_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = v;
        }
        if let Ok(val) = std::env::var("CLAWCORE_AGENT_WORKSPACE") {
            self.agent.workspace = Some(val);
        }

        // Compaction
        if let Some(v) = env_parse("CLAWCORE_COMPACTION_MAX_HISTORY_TOKENS") {
            self.compaction.max_history_tokens = v;
        }

        // Providers
        if let Ok(val) = std::env::var("CLAWCORE_PROVIDERS_DEFAULTS_CHAT") {
            self.providers.defaults.chat = Some(val);
        }
        if let Ok(val) = std::env::var("CLAWCORE_PROVIDERS_DEFAULTS_TOOLS") {
            self.providers.defaults.tools = Some(val);
        }
        if let Some(v) = env_parse("CLAWCORE_PROVIDERS_CALL_TIMEOUT_SECS") {
            self.providers.call_timeout_secs = v;
        }
        for entry in &mut self.providers.entries {
            let prefix = format!("CLAWCORE_PROVIDERS_{}", env_key(&entry.id));
            if let Ok(val) = std::env::var(format!("{}_API_KEY", prefix)) {
                entry.api_key = Some(val);
            }
            if let Ok(val) = std::env::var(format!("{}_API_BASE", prefix)) {
                entry.api_base = Some(val);
            }
            if let Ok(val) = std::env::var(format!("{}_MODEL", prefix)) {
                entry.model = val;
            }
        }

        // Router
        if let Some(v) = env_parse("CLAWCORE_ROUTER_QUEUE_CAPACITY") {
            self.router.queue_capacity = v;
        }
        if let Some(v) = env_parse("CLAWCORE_ROUTER_MAX_CONCURRENCY") {
            self.router.max_concurrency = v;
        }
        if let Some(v) = env_parse("CLAWCORE_ROUTER_DRAIN_TIMEOUT_SECS") {
            self.router.drain_timeout_secs = v;
        }

        // Logging
        if let Ok(val) = std::env::var("CLAWCORE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CLAWCORE_LOG_FORMAT") {
            match val.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                "component" => self.logging.format = LogFormat::Component,
                _ => {}
            }
        }
    }

    /// Per-iteration provider timeout.
    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.iteration_timeout_secs)
    }

    /// Default tool timeout.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// `openai-mini` becomes `OPENAI_MINI`.
fn env_key(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
