//! Configuration validation: unknown field detection and semantic checks.

use serde_json::Value;
use std::collections::HashSet;

use super::Config;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "agent",
    "compaction",
    "providers",
    "tool_profiles",
    "router",
    "logging",
];

const KNOWN_AGENT: &[&str] = &[
    "agent_name",
    "max_iterations",
    "iteration_timeout_secs",
    "tool_timeout_secs",
    "max_tool_result_bytes",
    "finalize_with_chat_provider",
    "finalize_digest_items",
    "workspace",
    "bootstrap_files",
    "system_prompt",
    "cron_tool_profile",
    "max_tokens",
    "temperature",
    "max_session_messages",
];

const KNOWN_COMPACTION: &[&str] = &[
    "max_history_tokens",
    "max_summary_chars",
    "proactive",
    "reactive",
    "emergency",
];

const KNOWN_PROVIDERS: &[&str] = &[
    "entries",
    "defaults",
    "fallback_chain",
    "retry",
    "cooldown",
    "call_timeout_secs",
];

const KNOWN_ROUTER: &[&str] = &[
    "queue_capacity",
    "max_concurrency",
    "session_idle_timeout_secs",
    "prune_interval_secs",
    "drain_timeout_secs",
    "max_dispatch_attempts",
    "allow_from",
    "channels",
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(
    obj: &serde_json::Map<String, Value>,
    known: &[&str],
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if known_set.contains(key.as_str()) {
            continue;
        }
        has_unknown = true;
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let message = match suggest_field(key, known) {
            Some(suggestion) => format!("Unknown field '{}'; {}", key, suggestion),
            None => format!("Unknown field '{}'", key),
        };
        diagnostics.push(Diagnostic::new(DiagnosticLevel::Error, path, message));
    }
    has_unknown
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "",
                "Config must be a JSON object",
            ));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let mut has_unknown = check_keys(obj, KNOWN_TOP_LEVEL, "", &mut diagnostics);
    for (section, known) in [
        ("agent", KNOWN_AGENT),
        ("compaction", KNOWN_COMPACTION),
        ("providers", KNOWN_PROVIDERS),
        ("router", KNOWN_ROUTER),
    ] {
        if let Some(inner) = obj.get(section).and_then(|v| v.as_object()) {
            has_unknown |= check_keys(inner, known, section, &mut diagnostics);
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    diagnostics
}

/// Semantic checks on a parsed config: ranges, dangling ids, empty capacities.
pub fn validate_semantics(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.agent.max_iterations == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "agent.max_iterations",
            "must be at least 1",
        ));
    }

    let compaction = &config.compaction;
    for (path, threshold) in [
        ("compaction.proactive.threshold", compaction.proactive.threshold),
        ("compaction.reactive.threshold", compaction.reactive.threshold),
        ("compaction.emergency.threshold", compaction.emergency.threshold),
        ("compaction.emergency.target", compaction.emergency.target),
    ] {
        if !(threshold > 0.0 && threshold <= 1.0) {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                path,
                format!("threshold {} is outside (0, 1]", threshold),
            ));
        }
    }
    if compaction.reactive.threshold > compaction.proactive.threshold {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "compaction.reactive.threshold",
            "higher than the proactive threshold; reactive compaction will rarely fire",
        ));
    }
    if compaction.emergency.target > compaction.emergency.threshold {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "compaction.emergency.target",
            "higher than the emergency threshold; compaction may stop above the trigger",
        ));
    }
    if compaction.max_history_tokens == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "compaction.max_history_tokens",
            "must be greater than zero",
        ));
    }

    let providers = &config.providers;
    let mut seen = HashSet::new();
    for (i, entry) in providers.entries.iter().enumerate() {
        if entry.id.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                format!("providers.entries[{}].id", i),
                "must not be empty",
            ));
        } else if !seen.insert(entry.id.as_str()) {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                format!("providers.entries[{}].id", i),
                format!("duplicate provider id '{}'", entry.id),
            ));
        }
        if entry.roles.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                format!("providers.entries[{}].roles", i),
                "no roles; provider can only be reached through the fallback chain",
            ));
        }
    }

    let defaults = [
        ("providers.defaults.chat", providers.defaults.chat.as_deref()),
        ("providers.defaults.tools", providers.defaults.tools.as_deref()),
        (
            "providers.defaults.cli_parent",
            providers.defaults.cli_parent.as_deref(),
        ),
    ];
    for (path, id) in defaults {
        if let Some(id) = id {
            if !seen.contains(id) {
                diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Error,
                    path,
                    format!("unknown provider id '{}'", id),
                ));
            }
        }
    }
    for id in &providers.fallback_chain {
        if !seen.contains(id.as_str()) {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                "providers.fallback_chain",
                format!("unknown provider id '{}' will be skipped", id),
            ));
        }
    }
    if providers.retry.primary_attempts == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "providers.retry.primary_attempts",
            "must be at least 1",
        ));
    }

    if let Some(profile) = &config.agent.cron_tool_profile {
        if !config.tool_profiles.contains_key(profile) {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "agent.cron_tool_profile",
                format!("unknown tool profile '{}'", profile),
            ));
        }
    }

    let router = &config.router;
    if router.queue_capacity == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "router.queue_capacity",
            "must be greater than zero",
        ));
    }
    if router.max_concurrency == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "router.max_concurrency",
            "must be greater than zero",
        ));
    }
    for (channel, overrides) in &router.channels {
        if overrides.capacity == Some(0) {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                format!("router.channels.{}.capacity", channel),
                "must be greater than zero",
            ));
        }
    }
    for (channel, allow) in &router.allow_from {
        if allow.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                format!("router.allow_from.{}", channel),
                "Empty; anyone can message this channel",
            ));
        }
    }

    diagnostics
}
