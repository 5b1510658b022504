//! LLM providers and the failover machinery around them.
//!
//! Backends implement [`LLMProvider`]. The [`ProviderManager`] registers them
//! with a role/tier profile and routes each call through an ordered attempt
//! list with retries, classified cooldowns and tool-call repair.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clawcore::providers::{ProviderManager, ProviderProfile, ProviderRequest, ProviderRole};
//! use clawcore::providers::openai::OpenAIProvider;
//! use clawcore::session::Message;
//!
//! async fn example() -> clawcore::Result<()> {
//!     let manager = ProviderManager::new();
//!     manager.register(
//!         ProviderProfile::new("openai", "gpt-4o"),
//!         Arc::new(OpenAIProvider::new("sk-xxx")),
//!     )?;
//!     manager.initialize()?;
//!
//!     let request = ProviderRequest::new(vec![Message::user("Hello!")], ProviderRole::Chat);
//!     let reply = manager.call_provider_with_fallback(request, "openai").await?;
//!     println!("{}: {}", reply.provider_id, reply.response.content);
//!     Ok(())
//! }
//! ```

pub mod cooldown;
mod error_classifier;
mod manager;
pub mod openai;
pub mod retry;
mod tool_repair;
mod types;

use std::sync::Arc;

use crate::config::ProviderEntryConfig;
use crate::error::{ClawError, ProviderError, Result};

pub use cooldown::{CooldownPolicy, CooldownTracker, FailoverReason, HealthState, ProviderHealth};
pub use error_classifier::{classify_error, classify_error_message};
pub use manager::{
    ProviderEvent, ProviderManager, ProviderProfile, ProviderReply, ProviderRequest, ProviderRole,
    ProviderSelection, ProviderTier, SelectOptions,
};
pub use openai::OpenAIProvider;
pub use retry::RetryPolicy;
pub use tool_repair::{
    build_repair_messages, looks_like_tool_call, parse_tool_calls_from_text, strip_tool_markup,
    REPAIR_INSTRUCTION,
};
pub use types::{
    ChatOptions, FinishReason, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage,
};

/// Backend kinds that [`build_provider`] understands.
pub const SUPPORTED_KINDS: &[&str] = &["openai", "openai_compatible"];

/// Parse an HTTP status code and response body into a structured [`ProviderError`].
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 | 422 => ProviderError::InvalidRequest(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}

/// Profile for a configured provider entry.
pub fn profile_for(entry: &ProviderEntryConfig) -> ProviderProfile {
    ProviderProfile::new(&entry.id, &entry.model)
        .with_roles(&entry.roles)
        .with_tier(entry.tier)
        .with_tool_support(entry.supports_tools)
}

/// Instantiate the backend for a configured provider entry.
pub fn build_provider(entry: &ProviderEntryConfig) -> Result<Arc<dyn LLMProvider>> {
    match entry.kind.as_str() {
        "openai" | "openai_compatible" => {
            let api_key = entry.api_key.as_deref().unwrap_or_default();
            let provider = match entry.api_base.as_deref() {
                Some(base) => OpenAIProvider::with_base_url(api_key, base),
                None if entry.kind == "openai" => OpenAIProvider::new(api_key),
                None => {
                    return Err(ClawError::Config(format!(
                        "provider '{}': openai_compatible requires api_base",
                        entry.id
                    )))
                }
            };
            Ok(Arc::new(provider.with_default_model(&entry.model)))
        }
        other => Err(ClawError::Config(format!(
            "provider '{}': unsupported kind '{}' (supported: {})",
            entry.id,
            other,
            SUPPORTED_KINDS.join(", ")
        ))),
    }
}

/// Register every enabled entry with `manager`. Returns how many were added.
pub fn register_configured(manager: &ProviderManager, entries: &[ProviderEntryConfig]) -> Result<usize> {
    let mut count = 0;
    for entry in entries.iter().filter(|e| e.enabled) {
        manager.register(profile_for(entry), build_provider(entry)?)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, base: Option<&str>) -> ProviderEntryConfig {
        ProviderEntryConfig {
            id: "p".into(),
            kind: kind.into(),
            model: "m".into(),
            api_base: base.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_provider_error_statuses() {
        assert!(matches!(parse_provider_error(401, "x"), ProviderError::Auth(_)));
        assert!(matches!(parse_provider_error(402, "x"), ProviderError::Billing(_)));
        assert!(matches!(parse_provider_error(404, "x"), ProviderError::ModelNotFound(_)));
        assert!(matches!(parse_provider_error(429, "x"), ProviderError::RateLimit(_)));
        assert!(matches!(parse_provider_error(400, "x"), ProviderError::InvalidRequest(_)));
        assert!(matches!(parse_provider_error(503, "x"), ProviderError::ServerError(_)));
    }

    #[test]
    fn test_parse_provider_error_unknown() {
        let err = parse_provider_error(418, "i'm a teapot");
        assert!(matches!(err, ProviderError::Unknown(_)));
        assert!(err.to_string().contains("HTTP 418"));
    }

    #[test]
    fn test_build_provider_kinds() {
        assert_eq!(build_provider(&entry("openai", None)).unwrap().default_model(), "m");
        assert!(build_provider(&entry("openai_compatible", Some("http://x/v1"))).is_ok());
        assert!(build_provider(&entry("openai_compatible", None)).is_err());
        assert!(build_provider(&entry("carrier_pigeon", None)).is_err());
    }

    #[test]
    fn test_register_configured_skips_disabled() {
        let manager = ProviderManager::new();
        let mut disabled = entry("openai", None);
        disabled.id = "off".into();
        disabled.enabled = false;
        let count = register_configured(&manager, &[entry("openai", None), disabled]).unwrap();
        assert_eq!(count, 1);
        assert_eq!(manager.profiles()[0].id, "p");
    }
}
