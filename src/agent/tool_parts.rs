//! Observable lifecycle of a single tool call.
//!
//! `Pending → Running → Completed | Error`. A call denied by policy goes
//! straight from `Pending` to `Error`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ClawError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPartStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolPartStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolPart {
    pub call_id: String,
    pub tool: String,
    pub input: Value,
    pub status: ToolPartStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolPart {
    pub fn pending(call_id: &str, tool: &str, input: Value) -> Self {
        Self {
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            input,
            status: ToolPartStatus::Pending,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            metadata: Map::new(),
        }
    }

    fn transition(&mut self, from: &[ToolPartStatus], to: ToolPartStatus) -> Result<()> {
        if !from.contains(&self.status) {
            return Err(ClawError::Tool(format!(
                "tool part {} cannot go from {:?} to {:?}",
                self.call_id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(&[ToolPartStatus::Pending], ToolPartStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, output: impl Into<String>) -> Result<()> {
        self.transition(&[ToolPartStatus::Running], ToolPartStatus::Completed)?;
        self.ended_at = Some(Utc::now());
        self.output = Some(output.into());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(
            &[ToolPartStatus::Pending, ToolPartStatus::Running],
            ToolPartStatus::Error,
        )?;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Wall time between start and end, if both happened.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
