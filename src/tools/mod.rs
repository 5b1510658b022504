//! Tools the agent can call.
//!
//! Tool implementations live outside this crate and plug in through the
//! [`Tool`] trait. The crate itself ships [`EchoTool`] for smoke tests and
//! the CLI.
//!
//! # Example
//!
//! ```rust
//! use clawcore::tools::{EchoTool, ToolContext, ToolPolicy, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Box::new(EchoTool));
//!
//! let defs = registry.definitions_for_policy(&ToolPolicy::allow_all(), &ToolContext::new());
//! assert_eq!(defs[0].name, "echo");
//! ```

mod policy;
mod registry;
mod types;

pub use policy::ToolPolicy;
pub use registry::ToolRegistry;
pub use types::{Tool, ToolContext, ToolResult};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ClawError, Result};

/// Echoes back the `message` argument.
///
/// ```rust
/// use clawcore::tools::{EchoTool, Tool, ToolContext};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let result = EchoTool.execute(json!({"message": "Hello"}), &ToolContext::new()).await;
/// assert_eq!(result.unwrap().data(), Some(&json!("Hello")));
/// # });
/// ```
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ClawError::Tool("Missing 'message' argument".into()))?;
        Ok(ToolResult::text(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_missing_message() {
        let err = EchoTool
            .execute(json!({}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::Tool(_)));
    }
}
