//! Context-window compaction.
//!
//! Three tiers, all measured against `max_history_tokens` with the
//! chars/4 estimate:
//!
//! - **Proactive** (start of an iteration): at 75% and more than 8 messages,
//!   summarize everything but the last 8.
//! - **Reactive** (after tool results): above 60%, summarize everything but
//!   the last 4.
//! - **Emergency** (after the assistant turn): at 50%, summarize all but the
//!   last 4 toward the 50% target, then drop the oldest third repeatedly,
//!   then keep only the system prompt and the last 2 messages. Trigger and
//!   target are separate settings.
//!
//! Summaries are extractive: a single system message of role-prefixed lines.
//! The leading system message is never touched, order is preserved, and a
//! result that is not smaller than its input is thrown away.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CompactionConfig;
use crate::error::{ClawError, Result};
use crate::session::{Message, Role};
use crate::utils::string::preview;

/// Prefix of every summary message.
pub const SUMMARY_HEADER: &str = "[Conversation Summary]";

/// Whether a message is a compaction summary.
pub fn is_summary(msg: &Message) -> bool {
    msg.role == Role::System && msg.content.starts_with(SUMMARY_HEADER)
}

/// Rough token count: `ceil(chars / 4)`.
///
/// ```
/// use clawcore::agent::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate for one message, including tool-call names and arguments.
pub fn estimate_message(msg: &Message) -> usize {
    let calls: usize = msg
        .tool_calls
        .iter()
        .flatten()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    estimate_tokens(&msg.content) + calls
}

/// Estimate for a whole history.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

/// Which step produced a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    Proactive,
    Reactive,
    EmergencySummarize,
    EmergencyDropOldest,
    EmergencyKeepLast,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proactive => "proactive",
            Self::Reactive => "reactive",
            Self::EmergencySummarize => "emergency_summarize",
            Self::EmergencyDropOldest => "emergency_drop_oldest",
            Self::EmergencyKeepLast => "emergency_keep_last",
        };
        f.write_str(s)
    }
}

/// A successful compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub messages: Vec<Message>,
    pub before: usize,
    pub after: usize,
    pub strategy: CompactionStrategy,
}

fn split_system(messages: &[Message]) -> (Option<&Message>, &[Message]) {
    match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    }
}

fn leading_tool_results(messages: &[Message]) -> usize {
    messages.iter().take_while(|m| m.is_tool_result()).count()
}

fn summary_line(msg: &Message) -> String {
    match msg.role {
        Role::Tool => format!(
            "tool({}): {}",
            msg.tool_name.as_deref().unwrap_or("unknown"),
            msg.content
        ),
        Role::Assistant if msg.has_tool_calls() => {
            let names: Vec<&str> = msg
                .tool_calls
                .iter()
                .flatten()
                .map(|c| c.name.as_str())
                .collect();
            format!("assistant: {} [called: {}]", msg.content, names.join(", "))
        }
        role => format!("{}: {}", role, msg.content),
    }
}

/// Replace all but the last `keep_recent` non-system messages with one
/// summary message.
///
/// Tool results at the head of the kept window lose their assistant call,
/// so they are folded into the summary as well. Returns the input unchanged
/// when there is nothing to summarize or the result would not be smaller.
///
/// ```
/// use clawcore::agent::compaction::summarize_older;
/// use clawcore::session::Message;
///
/// let msgs = vec![
///     Message::system("You are helpful."),
///     Message::user(&"Tell me about Rust ".repeat(20)),
///     Message::assistant(&"Rust is a systems language ".repeat(20)),
///     Message::user("What about async?"),
///     Message::assistant("Async in Rust uses tokio."),
/// ];
/// let out = summarize_older(&msgs, 2, 80);
/// assert_eq!(out.len(), 4); // system + summary + 2 recent
/// assert!(out[1].content.starts_with("[Conversation Summary]"));
/// ```
pub fn summarize_older(
    messages: &[Message],
    keep_recent: usize,
    max_summary_chars: usize,
) -> Vec<Message> {
    let (system, rest) = split_system(messages);
    if rest.len() <= keep_recent {
        return messages.to_vec();
    }

    let mut split = rest.len() - keep_recent;
    split += leading_tool_results(&rest[split..]);
    let (older, recent) = rest.split_at(split);

    let lines: Vec<String> = older.iter().map(summary_line).collect();
    let body = preview(&lines.join("\n"), max_summary_chars);
    let summary = Message::system(&format!("{}\n{}", SUMMARY_HEADER, body));

    let mut out = Vec::with_capacity(recent.len() + 2);
    out.extend(system.cloned());
    out.push(summary);
    out.extend_from_slice(recent);

    if estimate_messages(&out) >= estimate_messages(messages) {
        return messages.to_vec();
    }
    out
}

/// Drop roughly the oldest third of the non-system history, never leaving
/// fewer than `keep_last` messages or an orphaned tool result at the head.
fn drop_oldest_third(messages: &[Message], keep_last: usize) -> Vec<Message> {
    let (system, rest) = split_system(messages);
    if rest.len() <= keep_last {
        return messages.to_vec();
    }

    let total: usize = rest.iter().map(estimate_message).sum();
    let goal = total.div_ceil(3);
    let max_drop = rest.len() - keep_last;
    let mut dropped_tokens = 0;
    let mut cut = 0;
    while cut < max_drop && (cut == 0 || dropped_tokens < goal) {
        dropped_tokens += estimate_message(&rest[cut]);
        cut += 1;
    }
    cut += leading_tool_results(&rest[cut..]);

    let mut out: Vec<Message> = system.cloned().into_iter().collect();
    out.extend_from_slice(&rest[cut..]);
    out
}

/// System prompt plus the last `keep_last` messages.
fn keep_last(messages: &[Message], keep_last: usize) -> Vec<Message> {
    let (system, rest) = split_system(messages);
    let start = rest.len().saturating_sub(keep_last);
    let tail = &rest[start..];
    let skip = leading_tool_results(tail);

    let mut out: Vec<Message> = system.cloned().into_iter().collect();
    out.extend_from_slice(&tail[skip..]);
    out
}

/// The three compaction tiers over one configuration.
#[derive(Debug, Clone)]
pub struct ContextCompactor {
    config: CompactionConfig,
}

impl ContextCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Token budget every threshold is a fraction of.
    pub fn budget(&self) -> usize {
        self.config.max_history_tokens
    }

    fn fraction(&self, threshold: f64) -> usize {
        (self.budget() as f64 * threshold) as usize
    }

    fn summarized(
        &self,
        messages: &[Message],
        keep: usize,
        before: usize,
        strategy: CompactionStrategy,
    ) -> Option<CompactionOutcome> {
        let out = summarize_older(messages, keep, self.config.max_summary_chars);
        let after = estimate_messages(&out);
        (after < before).then(|| CompactionOutcome {
            messages: out,
            before,
            after,
            strategy,
        })
    }

    /// Tier 1, checked at the start of each iteration.
    pub fn proactive(&self, messages: &[Message]) -> Option<CompactionOutcome> {
        let cfg = &self.config.proactive;
        if !cfg.enabled {
            return None;
        }
        let before = estimate_messages(messages);
        let non_system = split_system(messages).1.len();
        if before < self.fraction(cfg.threshold) || non_system <= cfg.min_recent {
            return None;
        }
        self.summarized(messages, cfg.min_recent, before, CompactionStrategy::Proactive)
    }

    /// Tier 2, checked after tool results are appended.
    pub fn reactive(&self, messages: &[Message]) -> Option<CompactionOutcome> {
        let cfg = &self.config.reactive;
        if !cfg.enabled {
            return None;
        }
        let before = estimate_messages(messages);
        if before <= self.fraction(cfg.threshold) {
            return None;
        }
        self.summarized(messages, cfg.min_recent, before, CompactionStrategy::Reactive)
    }

    /// Tier 3, checked once per iteration after the assistant turn.
    ///
    /// Returns `Ok(None)` below the trigger threshold. Each step is tried in turn and
    /// the first one that gets strictly under the target wins. If even the
    /// last step cannot shrink the history, the result is
    /// [`ClawError::ContextOverflow`].
    pub fn emergency(&self, messages: &[Message]) -> Result<Option<CompactionOutcome>> {
        let cfg = &self.config.emergency;
        if !cfg.enabled {
            return Ok(None);
        }
        let trigger = self.fraction(cfg.threshold);
        let target = self.fraction(cfg.target);
        let before = estimate_messages(messages);
        if before < trigger {
            return Ok(None);
        }
        warn!(before, trigger, target, budget = self.budget(), "Emergency compaction");

        let outcome = |messages: Vec<Message>, strategy| {
            let after = estimate_messages(&messages);
            Some(CompactionOutcome {
                messages,
                before,
                after,
                strategy,
            })
        };

        let mut current =
            summarize_older(messages, cfg.min_recent, self.config.max_summary_chars);
        if estimate_messages(&current) < target {
            return Ok(outcome(current, CompactionStrategy::EmergencySummarize));
        }

        loop {
            let dropped = drop_oldest_third(&current, cfg.keep_last);
            if dropped.len() == current.len() {
                break;
            }
            current = dropped;
            let est = estimate_messages(&current);
            debug!(est, target, "Dropped oldest third");
            if est < target {
                return Ok(outcome(current, CompactionStrategy::EmergencyDropOldest));
            }
        }

        let last = keep_last(&current, cfg.keep_last);
        let after = estimate_messages(&last);
        if after < before {
            return Ok(outcome(last, CompactionStrategy::EmergencyKeepLast));
        }
        Err(ClawError::ContextOverflow {
            estimated: before,
            budget: self.budget(),
        })
    }
}
