//! OpenAI-compatible Chat Completions backend.
//!
//! Works against api.openai.com and any server speaking the same wire format
//! (vLLM, Ollama, OpenRouter, Groq). HTTP failures are reported as typed
//! [`ProviderError`]s so the failover loop can classify them without string
//! matching.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClawError, ProviderError, Result};
use crate::session::{Message, Role};

use super::{
    parse_provider_error, ChatOptions, FinishReason, LLMProvider, LLMResponse, LLMToolCall,
    ToolDefinition, Usage,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    /// `"required"` when the caller demands a structured tool call
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    /// Null for an assistant turn that only carries tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

/// Backend for the OpenAI Chat Completions API and compatible servers.
pub struct OpenAIProvider {
    api_key: String,
    api_base: String,
    default_model: String,
    client: Client,
}

impl OpenAIProvider {
    /// Provider for api.openai.com.
    ///
    /// # Example
    /// ```
    /// use clawcore::providers::openai::OpenAIProvider;
    /// use clawcore::providers::LLMProvider;
    ///
    /// let provider = OpenAIProvider::new("sk-xxx");
    /// assert_eq!(provider.name(), "openai");
    /// assert_eq!(provider.default_model(), "gpt-4o");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self::with_client(api_key, OPENAI_API_URL, Client::new())
    }

    /// Provider for an OpenAI-compatible server. A trailing slash is dropped.
    pub fn with_base_url(api_key: &str, api_base: &str) -> Self {
        Self::with_client(api_key, api_base, Client::new())
    }

    pub fn with_client(api_key: &str, api_base: &str, client: Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    /// Model used when the caller passes none.
    pub fn with_default_model(mut self, model: &str) -> Self {
        if !model.is_empty() {
            self.default_model = model.to_string();
        }
        self
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_wire_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let tool_calls = msg.tool_calls.filter(|c| !c.is_empty()).map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| WireToolCall {
                        id: tc.id,
                        kind: function_type(),
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect::<Vec<_>>()
            });
            let content = if msg.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(msg.content)
            };
            WireMessage {
                role: role_str(msg.role),
                content,
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn to_wire_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

fn from_wire_response(response: ChatResponse) -> LLMResponse {
    let mut out = match response.choices.into_iter().next() {
        Some(choice) => {
            let content = choice.message.content.unwrap_or_default();
            let calls: Vec<LLMToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| LLMToolCall::new(&tc.id, &tc.function.name, &tc.function.arguments))
                .collect();
            let mut resp = if calls.is_empty() {
                LLMResponse::text(&content)
            } else {
                LLMResponse::with_tools(&content, calls)
            };
            if let Some(reason) = choice.finish_reason.as_deref() {
                resp = resp.with_finish_reason(FinishReason::from_wire(reason));
            }
            resp
        }
        None => LLMResponse::text(""),
    };
    if let Some(usage) = response.usage {
        out = out.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    out
}

/// Typed error for a non-2xx reply. The structured error message is used
/// when the body carries one.
fn http_error(status: u16, body: &str) -> ProviderError {
    let detail = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => match env.error.kind {
            Some(kind) => format!("{}: {}", kind, env.error.message),
            None => env.error.message,
        },
        Err(_) => body.to_string(),
    };
    // Some compatible servers report overload as 529 or inside a 5xx body.
    if status == 529 || detail.to_lowercase().contains("overloaded") {
        return ProviderError::Overloaded(detail);
    }
    parse_provider_error(status, &detail)
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.default_model).to_string();
        let has_tools = !tools.is_empty();
        let request = ChatRequest {
            model: model.clone(),
            messages: to_wire_messages(messages),
            tools: has_tools.then(|| to_wire_tools(tools)),
            tool_choice: (has_tools && options.require_tool_call).then_some("required"),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop,
        };

        debug!(model = %model, base = %self.api_base, "OpenAI request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClawError::ProviderTyped(http_error(status.as_u16(), &body)));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ClawError::ProviderTyped(ProviderError::Format(format!(
                "unparseable completion from {}: {}",
                model, e
            )))
        })?;
        Ok(from_wire_response(parsed))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAIProvider::with_base_url("k", "http://localhost:8000/v1/");
        assert_eq!(provider.api_base, "http://localhost:8000/v1");
    }

    #[test]
    fn test_default_model_override() {
        let provider = OpenAIProvider::new("k").with_default_model("llama3");
        assert_eq!(provider.default_model(), "llama3");
        let unchanged = OpenAIProvider::new("k").with_default_model("");
        assert_eq!(unchanged.default_model(), "gpt-4o");
    }

    #[test]
    fn test_tool_turn_conversion() {
        let converted = to_wire_messages(vec![
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "echo", "{}")]),
            Message::tool_result("c1", "echo", r#"{"ok":true}"#),
        ]);
        assert_eq!(converted[0].role, "assistant");
        assert!(converted[0].content.is_none());
        assert_eq!(converted[0].tool_calls.as_ref().unwrap()[0].kind, "function");
        assert_eq!(converted[1].role, "tool");
        assert_eq!(converted[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_tool_choice_only_when_required() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![],
            tools: Some(to_wire_tools(vec![ToolDefinition::new(
                "echo",
                "Echo",
                serde_json::json!({"type": "object"}),
            )])),
            tool_choice: Some("required"),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""tool_choice":"required""#));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_response_finish_reason_and_usage() {
        let raw = r#"{
            "choices": [{"message": {"content": "partial <tool_call>"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let resp = from_wire_response(serde_json::from_str(raw).unwrap());
        assert!(resp.is_truncated());
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_response_tool_calls() {
        let raw = r#"{"choices": [{"message": {"content": null, "tool_calls": [
            {"id": "call_1", "type": "function", "function": {"name": "echo", "arguments": "{\"a\":1}"}}
        ]}, "finish_reason": "tool_calls"}]}"#;
        let resp = from_wire_response(serde_json::from_str(raw).unwrap());
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls[0].name, "echo");
        assert_eq!(resp.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn test_empty_choices() {
        let resp = from_wire_response(serde_json::from_str(r#"{"choices": []}"#).unwrap());
        assert_eq!(resp.content, "");
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn test_http_error_mapping() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#;
        assert!(matches!(http_error(429, body), ProviderError::RateLimit(m) if m.contains("Rate limit")));
        assert!(matches!(http_error(401, "nope"), ProviderError::Auth(_)));
        assert!(matches!(http_error(529, "busy"), ProviderError::Overloaded(_)));
        assert!(matches!(
            http_error(503, r#"{"error": {"message": "Engine overloaded"}}"#),
            ProviderError::Overloaded(_)
        ));
    }
}
