//! Tool registry.
//!
//! Name-keyed table of tools. Built once, then shared read-only behind an
//! `Arc` by every run.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::providers::ToolDefinition;

use super::{Tool, ToolContext, ToolPolicy, ToolResult};

/// A registry that holds and executes tools.
///
/// # Example
///
/// ```rust
/// use clawcore::tools::{EchoTool, ToolContext, ToolRegistry};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
/// assert!(registry.has("echo"));
///
/// let result = registry
///     .execute("echo", json!({"message": "hello"}), &ToolContext::new())
///     .await;
/// assert_eq!(result.data(), Some(&json!("hello")));
/// # });
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Replacing already registered tool");
        } else {
            debug!(tool = %name, "Registering tool");
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Timeout declared by the tool itself.
    pub fn tool_timeout(&self, name: &str) -> Option<Duration> {
        self.tools.get(name).and_then(|t| t.timeout())
    }

    fn definition(tool: &dyn Tool) -> ToolDefinition {
        ToolDefinition::new(tool.name(), tool.description(), tool.parameters())
    }

    /// Every tool definition, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|n| self.get(n))
            .map(Self::definition)
            .collect()
    }

    /// Definitions the policy allows and that are available in `ctx`.
    pub fn definitions_for_policy(
        &self,
        policy: &ToolPolicy,
        ctx: &ToolContext,
    ) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter(|n| policy.allows(n))
            .filter_map(|n| self.get(n))
            .filter(|t| t.is_available(ctx))
            .map(Self::definition)
            .collect()
    }

    /// Execute a tool. Never fails: an unknown tool or an `Err` from the
    /// tool becomes [`ToolResult::Failure`].
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Tool not found");
            return ToolResult::failure(format!("Tool not found: {}", name));
        };

        let start = Instant::now();
        match tool.execute(args, ctx).await {
            Ok(result) => {
                info!(
                    tool = name,
                    ok = result.is_success(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed"
                );
                result
            }
            Err(e) => {
                warn!(
                    tool = name,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool execution failed"
                );
                ToolResult::failure(e.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClawError, Result};
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use serde_json::json;

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(2))
        }
        fn is_available(&self, ctx: &ToolContext) -> bool {
            !ctx.is_cron
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            Err(ClawError::Tool("kaput".into()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(Broken));
        registry
    }

    #[test]
    fn test_definitions_sorted() {
        let names: Vec<String> = registry().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["broken", "echo"]);
    }

    #[test]
    fn test_definitions_for_policy() {
        let registry = registry();
        let policy = ToolPolicy::allow_only("minimal", ["echo"]);
        let defs = registry.definitions_for_policy(&policy, &ToolContext::new());
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let cron = ToolContext::new().with_cron(true);
        let defs = registry.definitions_for_policy(&ToolPolicy::allow_all(), &cron);
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn test_tool_timeout() {
        let registry = registry();
        assert_eq!(registry.tool_timeout("broken"), Some(Duration::from_secs(2)));
        assert_eq!(registry.tool_timeout("echo"), None);
        assert_eq!(registry.tool_timeout("missing"), None);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_failure() {
        let result = registry()
            .execute("nope", json!({}), &ToolContext::new())
            .await;
        assert_eq!(result.error(), Some("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_execute_error_becomes_failure() {
        let result = registry()
            .execute("broken", json!({}), &ToolContext::new())
            .await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("kaput"));
    }
}
