//! Run lifecycle events and the sinks that receive them.
//!
//! Sinks are registered explicitly on the engine; there is no global bus.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::compaction::CompactionStrategy;
use super::tool_parts::{ToolPart, ToolPartStatus};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    MaxIterationsReached,
    Error,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::MaxIterationsReached => write!(f, "max_iterations_reached"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        session_key: String,
        channel: String,
    },
    ProvidersSelected {
        run_id: String,
        tools_provider: String,
        chat_provider: Option<String>,
    },
    IterationStarted {
        run_id: String,
        iteration: u32,
    },
    ContextCompacted {
        run_id: String,
        strategy: CompactionStrategy,
        before: usize,
        after: usize,
    },
    ToolPartUpdated {
        run_id: String,
        part: ToolPart,
    },
    ToolDenied {
        run_id: String,
        tool: String,
        denials: u32,
    },
    RunFinished {
        run_id: String,
        outcome: RunOutcome,
        iterations: u32,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::ProvidersSelected { run_id, .. }
            | Self::IterationStarted { run_id, .. }
            | Self::ContextCompacted { run_id, .. }
            | Self::ToolPartUpdated { run_id, .. }
            | Self::ToolDenied { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Receives every event of every run. Must not block.
pub trait RunEventSink: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RunEventSink for TracingSink {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                run_id,
                session_key,
                channel,
            } => info!(run_id, session_key, channel, "Run started"),
            RunEvent::ProvidersSelected {
                run_id,
                tools_provider,
                chat_provider,
            } => debug!(run_id, tools_provider, chat_provider = ?chat_provider, "Providers selected"),
            RunEvent::IterationStarted { run_id, iteration } => {
                debug!(run_id, iteration, "Iteration started")
            }
            RunEvent::ContextCompacted {
                run_id,
                strategy,
                before,
                after,
            } => info!(run_id, strategy = %strategy, before, after, "Context compacted"),
            RunEvent::ToolPartUpdated { run_id, part } => match part.status {
                ToolPartStatus::Error => warn!(
                    run_id,
                    tool = %part.tool,
                    call_id = %part.call_id,
                    error = part.error.as_deref().unwrap_or(""),
                    "Tool call failed"
                ),
                status => debug!(run_id, tool = %part.tool, call_id = %part.call_id, status = ?status, "Tool part"),
            },
            RunEvent::ToolDenied {
                run_id,
                tool,
                denials,
            } => warn!(run_id, tool, denials, "Tool denied by policy"),
            RunEvent::RunFinished {
                run_id,
                outcome,
                iterations,
                duration_ms,
            } => info!(run_id, outcome = %outcome, iterations, duration_ms, "Run finished"),
        }
    }
}
