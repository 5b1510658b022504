//! Run metrics collector.
//!
//! Counts run lifecycle events with atomics so it can be shared across every
//! concurrent run as an `Arc<RunMetrics>` and registered as an event sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::agent::{RunEvent, RunEventSink, RunOutcome, ToolPartStatus};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_max_iterations: u64,
    pub runs_failed: u64,
    pub iterations: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
    pub tool_denials: u64,
    pub compactions: u64,
}

impl MetricsSnapshot {
    /// Fraction of finished runs that succeeded; 1.0 when nothing finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.runs_succeeded + self.runs_max_iterations + self.runs_failed;
        if finished == 0 {
            return 1.0;
        }
        self.runs_succeeded as f64 / finished as f64
    }
}

#[derive(Debug, Default)]
pub struct RunMetrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_max_iterations: AtomicU64,
    runs_failed: AtomicU64,
    iterations: AtomicU64,
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
    tool_denials: AtomicU64,
    compactions: AtomicU64,
    // Per-tool completed call counts.
    per_tool: Mutex<HashMap<String, u64>>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_max_iterations: self.runs_max_iterations.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.tool_errors.load(Ordering::Relaxed),
            tool_denials: self.tool_denials.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }

    /// How many times `tool` reached a terminal state.
    pub fn tool_count(&self, tool: &str) -> u64 {
        self.per_tool
            .lock()
            .map(|m| m.get(tool).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Runs: {} started, {} ok, {} max-iter, {} failed | Tools: {} calls ({} errors, {} denied) | Compactions: {}",
            s.runs_started,
            s.runs_succeeded,
            s.runs_max_iterations,
            s.runs_failed,
            s.tool_calls,
            s.tool_errors,
            s.tool_denials,
            s.compactions,
        )
    }
}

impl RunEventSink for RunMetrics {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { .. } => {
                self.runs_started.fetch_add(1, Ordering::Relaxed);
            }
            RunEvent::IterationStarted { .. } => {
                self.iterations.fetch_add(1, Ordering::Relaxed);
            }
            RunEvent::ContextCompacted { .. } => {
                self.compactions.fetch_add(1, Ordering::Relaxed);
            }
            RunEvent::ToolDenied { .. } => {
                self.tool_denials.fetch_add(1, Ordering::Relaxed);
            }
            RunEvent::ToolPartUpdated { part, .. } if part.status.is_terminal() => {
                // Denied calls never started; they are counted as denials only.
                if part.started_at.is_none() {
                    return;
                }
                self.tool_calls.fetch_add(1, Ordering::Relaxed);
                if part.status == ToolPartStatus::Error {
                    self.tool_errors.fetch_add(1, Ordering::Relaxed);
                }
                if let Ok(mut per_tool) = self.per_tool.lock() {
                    *per_tool.entry(part.tool.clone()).or_default() += 1;
                }
            }
            RunEvent::RunFinished { outcome, .. } => {
                let counter = match outcome {
                    RunOutcome::Success => &self.runs_succeeded,
                    RunOutcome::MaxIterationsReached => &self.runs_max_iterations,
                    RunOutcome::Error => &self.runs_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}
