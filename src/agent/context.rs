//! Prompt construction for agent runs.
//!
//! [`PromptBuilder`] is the seam through which the engine obtains its system
//! prompt and trims oversized histories. [`ContextBuilder`] is the default
//! implementation; [`RuntimeContext`] renders environment facts (channel,
//! tools, time, workspace, platform) into the prompt.

use std::path::Path;

use tracing::debug;

use super::compaction;
use crate::session::{Message, Role};
use crate::utils::string::preview;

/// Default system prompt when none is configured.
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are {agent}, an autonomous assistant.

You have access to tools to help accomplish tasks. Use them when needed.

Be concise but helpful. Focus on completing the user's request efficiently."#;

/// Bootstrap files larger than this many characters are cut.
pub const MAX_BOOTSTRAP_CHARS: usize = 20_000;

/// Runtime facts injected into the system prompt.
///
/// # Example
///
/// ```rust
/// use clawcore::agent::RuntimeContext;
///
/// let ctx = RuntimeContext::new()
///     .with_channel("telegram")
///     .with_tools(vec!["shell".to_string(), "web_search".to_string()]);
///
/// let rendered = ctx.render().unwrap();
/// assert!(rendered.contains("Channel: telegram"));
/// assert!(rendered.contains("shell, web_search"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub channel: Option<String>,
    pub available_tools: Vec<String>,
    pub current_time: Option<String>,
    pub workspace: Option<String>,
    pub os_info: Option<String>,
    pub cron: bool,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    /// Set the current time to now (UTC, RFC 3339).
    pub fn with_current_time(mut self) -> Self {
        self.current_time = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_string());
        self
    }

    pub fn with_os_info(mut self) -> Self {
        self.os_info = Some(format!(
            "{} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        self
    }

    /// Mark the run as triggered by a scheduled job rather than a person.
    pub fn with_cron(mut self, cron: bool) -> Self {
        self.cron = cron;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.available_tools.is_empty()
            && self.current_time.is_none()
            && self.workspace.is_none()
            && self.os_info.is_none()
            && !self.cron
    }

    /// Render as a markdown section, or `None` if nothing is set.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        if let Some(ref channel) = self.channel {
            parts.push(format!("- Channel: {}", channel));
        }
        if !self.available_tools.is_empty() {
            parts.push(format!(
                "- Available tools: {}",
                self.available_tools.join(", ")
            ));
        }
        if let Some(ref time) = self.current_time {
            parts.push(format!("- Current time: {}", time));
        }
        if let Some(ref workspace) = self.workspace {
            parts.push(format!("- Workspace: {}", workspace));
        }
        if let Some(ref os) = self.os_info {
            parts.push(format!("- Platform: {}", os));
        }
        if self.cron {
            parts.push("- Trigger: scheduled job (no user is waiting)".to_string());
        }

        Some(format!("## Runtime Context\n\n{}", parts.join("\n")))
    }
}

/// A workspace file whose content is pasted into the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapFile {
    pub name: String,
    pub content: String,
}

/// Everything a system prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub agent_name: &'a str,
    pub base_prompt: Option<&'a str>,
    pub bootstrap: &'a [BootstrapFile],
    pub runtime: Option<&'a RuntimeContext>,
    pub memory_context: Option<&'a str>,
}

/// Builds system prompts and fits histories into a token budget.
pub trait PromptBuilder: Send + Sync {
    fn build_system_prompt(&self, inputs: &PromptInputs<'_>) -> String;

    /// Read `names` from `dir`. Missing or unreadable files are skipped.
    fn load_bootstrap_files(&self, dir: &Path, names: &[String]) -> Vec<BootstrapFile>;

    /// Drop the oldest non-system messages until the estimate fits
    /// `max_tokens`. The last message always survives.
    fn trim_messages_for_context(&self, messages: Vec<Message>, max_tokens: usize) -> Vec<Message> {
        trim_to_budget(messages, max_tokens, |text| self.estimate_tokens(text))
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        compaction::estimate_tokens(text)
    }
}

fn trim_to_budget(
    messages: Vec<Message>,
    max_tokens: usize,
    estimate: impl Fn(&str) -> usize,
) -> Vec<Message> {
    let cost = |m: &Message| {
        let calls = m
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| estimate(&c.name) + estimate(&c.arguments))
                    .sum::<usize>()
            })
            .unwrap_or(0);
        estimate(&m.content) + calls
    };

    let lead = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();
    let mut total: usize = messages.iter().map(cost).sum();
    if total <= max_tokens {
        return messages;
    }

    let mut iter = messages.into_iter();
    let head: Vec<Message> = iter.by_ref().take(lead).collect();
    let mut tail: std::collections::VecDeque<Message> = iter.collect();

    while total > max_tokens && tail.len() > 1 {
        if let Some(dropped) = tail.pop_front() {
            total = total.saturating_sub(cost(&dropped));
        }
    }
    // A tool result cannot open the history without its assistant call.
    while tail.len() > 1 && tail.front().is_some_and(|m| m.is_tool_result()) {
        tail.pop_front();
    }

    debug!(kept = head.len() + tail.len(), "Trimmed messages for context");
    head.into_iter().chain(tail).collect()
}

/// Default [`PromptBuilder`].
///
/// # Example
///
/// ```rust
/// use clawcore::agent::{ContextBuilder, PromptBuilder, PromptInputs};
///
/// let builder = ContextBuilder::new();
/// let prompt = builder.build_system_prompt(&PromptInputs {
///     agent_name: "clawcore",
///     ..Default::default()
/// });
/// assert!(prompt.contains("You are clawcore"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    max_bootstrap_chars: Option<usize>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bootstrap_chars(mut self, max: usize) -> Self {
        self.max_bootstrap_chars = Some(max);
        self
    }

    /// Convenience: system message, then history, then the user query
    /// (skipped when empty).
    pub fn build_messages(
        &self,
        system_prompt: &str,
        history: Vec<Message>,
        user_input: &str,
    ) -> Vec<Message> {
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(history.into_iter().filter(|m| m.role != Role::System));
        if !user_input.is_empty() {
            messages.push(Message::user(user_input));
        }
        messages
    }
}

impl PromptBuilder for ContextBuilder {
    fn build_system_prompt(&self, inputs: &PromptInputs<'_>) -> String {
        let mut content = match inputs.base_prompt {
            Some(prompt) if !prompt.trim().is_empty() => prompt.to_string(),
            _ => DEFAULT_SYSTEM_PROMPT.replace("{agent}", inputs.agent_name),
        };

        for file in inputs.bootstrap {
            content.push_str(&format!("\n\n## {}\n\n{}", file.name, file.content.trim()));
        }
        if let Some(memory) = inputs.memory_context.filter(|m| !m.trim().is_empty()) {
            content.push_str("\n\n## Memory\n\n");
            content.push_str(memory.trim());
        }
        if let Some(rendered) = inputs.runtime.and_then(|ctx| ctx.render()) {
            content.push_str("\n\n");
            content.push_str(&rendered);
        }
        content
    }

    fn load_bootstrap_files(&self, dir: &Path, names: &[String]) -> Vec<BootstrapFile> {
        let max = self.max_bootstrap_chars.unwrap_or(MAX_BOOTSTRAP_CHARS);
        names
            .iter()
            .filter_map(|name| {
                let path = dir.join(name);
                match std::fs::read_to_string(&path) {
                    Ok(content) if !content.trim().is_empty() => Some(BootstrapFile {
                        name: name.clone(),
                        content: preview(&content, max),
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Skipping bootstrap file");
                        None
                    }
                }
            })
            .collect()
    }
}
