//! Configuration types for ClawCore
//!
//! Every section deserializes with `#[serde(default)]`, so a partial config
//! file only needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::providers::{ProviderRole, ProviderTier};

/// Main configuration struct for ClawCore.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Agent run loop settings
    pub agent: AgentConfig,
    /// Context compaction thresholds
    pub compaction: CompactionConfig,
    /// Provider profiles, role defaults and failover
    pub providers: ProvidersConfig,
    /// Named tool allow-lists. `null` means "all registered tools".
    pub tool_profiles: HashMap<String, Option<Vec<String>>>,
    /// Inbound message router
    pub router: RouterConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent
// ============================================================================

/// Settings for a single agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name used in the default system prompt
    pub agent_name: String,
    /// Maximum provider round-trips per run
    pub max_iterations: u32,
    /// Timeout applied to each provider round-trip (seconds)
    pub iteration_timeout_secs: u64,
    /// Default tool timeout when the tool does not declare one (seconds)
    pub tool_timeout_secs: u64,
    /// Tool output larger than this is truncated before entering history
    pub max_tool_result_bytes: usize,
    /// Re-invoke a distinct chat provider to phrase the final answer
    pub finalize_with_chat_provider: bool,
    /// Number of recent tool outputs included in the finalization digest
    pub finalize_digest_items: usize,
    /// Workspace directory holding bootstrap files
    pub workspace: Option<String>,
    /// Bootstrap files injected into the system prompt, in order
    pub bootstrap_files: Vec<String>,
    /// Extra system prompt text appended after the identity block
    pub system_prompt: Option<String>,
    /// Tool profile applied to cron-triggered runs when none is given
    pub cron_tool_profile: Option<String>,
    /// Maximum tokens to request from providers
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Messages retained per session by the router-facing handler
    pub max_session_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "ClawCore".to_string(),
            max_iterations: 6,
            iteration_timeout_secs: 120,
            tool_timeout_secs: 30,
            max_tool_result_bytes: 16 * 1024,
            finalize_with_chat_provider: true,
            finalize_digest_items: 3,
            workspace: None,
            bootstrap_files: vec![
                "AGENTS.md".to_string(),
                "SOUL.md".to_string(),
                "USER.md".to_string(),
            ],
            system_prompt: None,
            cron_tool_profile: None,
            max_tokens: Some(4096),
            temperature: Some(0.7),
            max_session_messages: 50,
        }
    }
}

// ============================================================================
// Compaction
// ============================================================================

/// Context compaction settings. Thresholds are fractions of `max_history_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Token budget for the whole history (chars / 4 estimate)
    pub max_history_tokens: usize,
    /// Upper bound on the generated summary text
    pub max_summary_chars: usize,
    pub proactive: ProactiveCompactionConfig,
    pub reactive: ReactiveCompactionConfig,
    pub emergency: EmergencyCompactionConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: 32_000,
            max_summary_chars: 2_000,
            proactive: ProactiveCompactionConfig::default(),
            reactive: ReactiveCompactionConfig::default(),
            emergency: EmergencyCompactionConfig::default(),
        }
    }
}

/// Start-of-iteration summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProactiveCompactionConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub min_recent: usize,
}

impl Default for ProactiveCompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.75,
            min_recent: 8,
        }
    }
}

/// Post-tool-result summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveCompactionConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub min_recent: usize,
}

impl Default for ReactiveCompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.60,
            min_recent: 4,
        }
    }
}

/// Mid-loop emergency truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyCompactionConfig {
    pub enabled: bool,
    /// Fraction of the budget that triggers the emergency tier
    pub threshold: f64,
    /// Fraction of the budget the history must end strictly below
    pub target: f64,
    /// Messages kept verbatim by the summarize step
    pub min_recent: usize,
    /// Messages kept verbatim by the last-resort step
    pub keep_last: usize,
}

impl Default for EmergencyCompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.50,
            target: 0.50,
            min_recent: 4,
            keep_last: 2,
        }
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Provider registry, role defaults and failover policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider profiles in registration order
    pub entries: Vec<ProviderEntryConfig>,
    /// Preferred provider id per role
    pub defaults: RoleDefaultsConfig,
    /// Provider ids tried after the primary and tier escalation candidates
    pub fallback_chain: Vec<String>,
    pub retry: RetryConfig,
    pub cooldown: CooldownConfig,
    /// Timeout for a single provider attempt (seconds)
    pub call_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            defaults: RoleDefaultsConfig::default(),
            fallback_chain: Vec::new(),
            retry: RetryConfig::default(),
            cooldown: CooldownConfig::default(),
            call_timeout_secs: 90,
        }
    }
}

/// A single configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntryConfig {
    /// Unique provider id
    pub id: String,
    /// Backend kind. Only OpenAI-compatible endpoints ship with the crate.
    pub kind: String,
    /// Model identifier sent to the backend
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub roles: Vec<ProviderRole>,
    pub supports_tools: bool,
    pub tier: ProviderTier,
    pub enabled: bool,
}

impl Default for ProviderEntryConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: "openai".to_string(),
            model: String::new(),
            api_key: None,
            api_base: None,
            roles: vec![ProviderRole::Chat, ProviderRole::Tools],
            supports_tools: true,
            tier: ProviderTier::Standard,
            enabled: true,
        }
    }
}

/// Preferred provider id per role.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RoleDefaultsConfig {
    pub chat: Option<String>,
    pub tools: Option<String>,
    pub cli_parent: Option<String>,
}

impl RoleDefaultsConfig {
    /// Configured default for a role.
    pub fn for_role(&self, role: ProviderRole) -> Option<&str> {
        match role {
            ProviderRole::Chat => self.chat.as_deref(),
            ProviderRole::Tools => self.tools.as_deref(),
            ProviderRole::CliParent => self.cli_parent.as_deref(),
        }
    }
}

/// Per-candidate attempt budget and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts against the primary provider
    pub primary_attempts: u32,
    /// Attempts against each non-primary candidate
    pub fallback_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            primary_attempts: 3,
            fallback_attempts: 1,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Base cooldown per failure reason (seconds). Durations double with each
/// consecutive failure up to `max_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub rate_limit_secs: u64,
    pub billing_secs: u64,
    pub auth_secs: u64,
    pub format_secs: u64,
    pub overloaded_secs: u64,
    pub timeout_secs: u64,
    pub unknown_secs: u64,
    pub max_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            billing_secs: 3_600,
            auth_secs: 300,
            format_secs: 300,
            overloaded_secs: 30,
            timeout_secs: 15,
            unknown_secs: 60,
            max_secs: 86_400,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Inbound message router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Default per-channel queue capacity
    pub queue_capacity: usize,
    /// Default per-channel dispatch concurrency
    pub max_concurrency: usize,
    /// Sessions idle longer than this are pruned (seconds)
    pub session_idle_timeout_secs: u64,
    /// Interval of the background prune sweep (seconds)
    pub prune_interval_secs: u64,
    /// Maximum time `stop` waits for queues to drain (seconds)
    pub drain_timeout_secs: u64,
    /// Handler invocations per message before it is dropped
    pub max_dispatch_attempts: u32,
    /// Sender allowlists per channel. Empty or absent allows everyone.
    pub allow_from: HashMap<String, Vec<String>>,
    /// Per-channel overrides
    pub channels: HashMap<String, ChannelQueueConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            max_concurrency: 1,
            session_idle_timeout_secs: 3_600,
            prune_interval_secs: 300,
            drain_timeout_secs: 30,
            max_dispatch_attempts: 1,
            allow_from: HashMap::new(),
            channels: HashMap::new(),
        }
    }
}

/// Queue overrides for one channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChannelQueueConfig {
    pub capacity: Option<usize>,
    pub max_concurrency: Option<usize>,
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    Pretty,
    /// Compact single-line output, grep-friendly
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
