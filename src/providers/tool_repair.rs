//! Recovery of tool calls that a model wrote into its text instead of the
//! structured `tool_calls` field.
//!
//! Supported shapes:
//! - `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`
//! - `<function=NAME>{...}</function>`
//! - `<function>NAME{...}</function>`
//! - a fenced code block holding `{"name": "...", "arguments": {...}}`
//!
//! Recovered calls must name an offered tool and carry a JSON object as
//! arguments. They get synthetic ids of the form `recovered_<uuid>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::Message;

use super::{LLMResponse, LLMToolCall, ToolDefinition};

static TOOL_CALL_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>").unwrap());

static FUNCTION_EQ_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function=([A-Za-z0-9_.\-]+)>\s*(\{.*?\})\s*</function>").unwrap()
});

static FUNCTION_BARE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function>\s*([A-Za-z0-9_.\-]+)\s*(\{.*?\})\s*</function>").unwrap()
});

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|tool_call)?\s*(\{.*?\})\s*```").unwrap());

/// Sent with the single repair request.
pub const REPAIR_INSTRUCTION: &str = "Your previous reply tried to call a tool but was not a valid \
structured tool call. Respond again with ONLY a structured tool call using one of the provided \
tools. Do not include any prose.";

/// True when `text` contains something shaped like a tool call.
pub fn looks_like_tool_call(text: &str) -> bool {
    text.contains("<tool_call")
        || text.contains("<function")
        || (text.contains("\"name\"") && text.contains("\"arguments\""))
}

/// Extract tool calls embedded in free text.
///
/// # Example
/// ```
/// use clawcore::providers::{parse_tool_calls_from_text, ToolDefinition};
/// use serde_json::json;
///
/// let tools = vec![ToolDefinition::new("echo", "Echo", json!({"type": "object"}))];
/// let calls = parse_tool_calls_from_text(
///     r#"<function=echo>{"message": "hi"}</function>"#,
///     &tools,
/// );
/// assert_eq!(calls.len(), 1);
/// assert_eq!(calls[0].name, "echo");
/// assert!(calls[0].id.starts_with("recovered_"));
/// ```
pub fn parse_tool_calls_from_text(text: &str, tools: &[ToolDefinition]) -> Vec<LLMToolCall> {
    let offered = |name: &str| tools.iter().any(|t| t.name == name);
    let mut calls = Vec::new();

    for caps in TOOL_CALL_TAG.captures_iter(text) {
        if let Some(call) = named_object_call(&caps[1], &offered) {
            calls.push(call);
        }
    }

    for re in [&*FUNCTION_EQ_TAG, &*FUNCTION_BARE_TAG] {
        for caps in re.captures_iter(text) {
            let name = caps[1].trim();
            if !offered(name) {
                warn!(tool = name, "Text tool call names an unknown tool, skipping");
                continue;
            }
            match arguments_object(&caps[2]) {
                Some(args) => calls.push(recovered(name, args)),
                None => warn!(tool = name, "Text tool call has unparseable arguments"),
            }
        }
    }

    if calls.is_empty() {
        for caps in FENCED_JSON.captures_iter(text) {
            if let Some(call) = named_object_call(&caps[1], &offered) {
                calls.push(call);
            }
        }
    }

    if !calls.is_empty() {
        debug!(count = calls.len(), "Recovered tool calls from text");
    }
    calls
}

/// `text` with every recognised tool-call block removed and trimmed.
pub fn strip_tool_markup(text: &str) -> String {
    let mut out = text.to_string();
    for re in [&*TOOL_CALL_TAG, &*FUNCTION_EQ_TAG, &*FUNCTION_BARE_TAG, &*FENCED_JSON] {
        out = re.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

/// Messages for the single repair request: the original conversation, the
/// model's malformed reply, and an instruction to answer with a structured call.
pub fn build_repair_messages(messages: &[Message], reply: &LLMResponse) -> Vec<Message> {
    let mut repaired = messages.to_vec();
    if !reply.content.trim().is_empty() {
        repaired.push(Message::assistant(&reply.content));
    }
    repaired.push(Message::user(REPAIR_INSTRUCTION));
    repaired
}

/// `{"name": ..., "arguments"|"parameters": {...}}`
fn named_object_call(raw: &str, offered: &dyn Fn(&str) -> bool) -> Option<LLMToolCall> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let name = value.get("name")?.as_str()?;
    if !offered(name) {
        warn!(tool = name, "Text tool call names an unknown tool, skipping");
        return None;
    }
    let args = match value.get("arguments").or_else(|| value.get("parameters")) {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => arguments_object(s)?,
        None => Value::Object(Default::default()),
        Some(_) => return None,
    };
    Some(recovered(name, args))
}

fn arguments_object(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn recovered(name: &str, args: Value) -> LLMToolCall {
    LLMToolCall::new(
        &format!("recovered_{}", uuid::Uuid::new_v4()),
        name,
        &args.to_string(),
    )
}
