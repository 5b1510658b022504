//! Tool trait, execution context and the structured tool result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClawError, Result};
use crate::utils::sanitize::sanitize_tool_result;

/// Outcome of one tool call.
///
/// Travels to the model as the content of the tool message, formatted as
/// `{"ok": true, "data": ...}` or `{"ok": false, "error": "..."}` with an
/// optional `metadata` object.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success {
        data: Value,
        metadata: Map<String, Value>,
    },
    Failure {
        error: String,
        metadata: Map<String, Value>,
    },
}

#[derive(Serialize, Deserialize)]
struct WireResult {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        Self::Success {
            data,
            metadata: Map::new(),
        }
    }

    /// Success carrying a plain string.
    pub fn text(text: impl Into<String>) -> Self {
        Self::success(Value::String(text.into()))
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            metadata: Map::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        match &mut self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => {
                metadata.insert(key.to_string(), value);
            }
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error, .. } => Some(error),
            Self::Success { .. } => None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    /// Wire text sent to the model.
    ///
    /// # Example
    /// ```
    /// use clawcore::tools::ToolResult;
    /// use serde_json::json;
    ///
    /// let ok = ToolResult::success(json!({"n": 1}));
    /// assert_eq!(ok.format(), r#"{"ok":true,"data":{"n":1}}"#);
    /// assert_eq!(ToolResult::parse(&ok.format()).unwrap(), ok);
    ///
    /// let err = ToolResult::failure("boom");
    /// assert_eq!(err.format(), r#"{"ok":false,"error":"boom"}"#);
    /// ```
    pub fn format(&self) -> String {
        let wire = match self.clone() {
            Self::Success { data, metadata } => WireResult {
                ok: true,
                data: Some(data),
                error: None,
                metadata,
            },
            Self::Failure { error, metadata } => WireResult {
                ok: false,
                data: None,
                error: Some(error),
                metadata,
            },
        };
        // A map of JSON values always serializes.
        serde_json::to_string(&wire)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"unserializable tool result"}"#.to_string())
    }

    /// Inverse of [`format`](Self::format).
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireResult = serde_json::from_str(text)
            .map_err(|e| ClawError::Tool(format!("not a tool result: {}", e)))?;
        Ok(if wire.ok {
            Self::Success {
                data: wire.data.unwrap_or(Value::Null),
                metadata: wire.metadata,
            }
        } else {
            Self::Failure {
                error: wire.error.unwrap_or_default(),
                metadata: wire.metadata,
            }
        })
    }

    /// Strip binary blobs and cap the payload at roughly `max_bytes`.
    ///
    /// String data is sanitized in place. Structured data whose JSON text is
    /// over budget is replaced by its truncated text.
    pub fn sanitized(self, max_bytes: usize) -> Self {
        match self {
            Self::Success { data, metadata } => {
                let data = match data {
                    Value::String(s) => Value::String(sanitize_tool_result(&s, max_bytes)),
                    other => {
                        let raw = other.to_string();
                        if raw.len() > max_bytes {
                            Value::String(sanitize_tool_result(&raw, max_bytes))
                        } else {
                            other
                        }
                    }
                };
                Self::Success { data, metadata }
            }
            Self::Failure { error, metadata } => Self::Failure {
                error: sanitize_tool_result(&error, max_bytes),
                metadata,
            },
        }
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use clawcore::tools::{Tool, ToolContext, ToolResult};
/// use clawcore::error::Result;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl Tool for MyTool {
///     fn name(&self) -> &str { "my_tool" }
///     fn description(&self) -> &str { "Does something useful" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult> {
///         Ok(ToolResult::text("Done!"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Sent to the model alongside the schema.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Per-tool execution timeout. `None` uses the agent default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the tool is offered in this context at all.
    fn is_available(&self, _ctx: &ToolContext) -> bool {
        true
    }

    /// Run the tool. An `Err` is turned into [`ToolResult::Failure`] by the registry.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Where a tool call comes from.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub run_id: String,
    pub session_key: String,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    /// The run was started by a scheduler rather than a person
    pub is_cron: bool,
    /// Name of the tool profile in effect
    pub policy: Option<String>,
    pub workspace: Option<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_run(run_id: &str, session_key: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            session_key: session_key.to_string(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: &str, chat_id: Option<&str>) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = chat_id.map(str::to_string);
        self
    }

    pub fn with_cron(mut self, is_cron: bool) -> Self {
        self.is_cron = is_cron;
        self
    }

    pub fn with_policy(mut self, policy: Option<&str>) -> Self {
        self.policy = policy.map(str::to_string);
        self
    }

    pub fn with_workspace(mut self, workspace: Option<&str>) -> Self {
        self.workspace = workspace.map(str::to_string);
        self
    }
}
