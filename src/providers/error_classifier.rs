//! Pattern-based classification of provider failures.
//!
//! Patterns are checked in priority order: billing > auth > rate_limit >
//! overloaded > timeout > format. Anything else is `Unknown`.

use crate::error::{ClawError, ProviderError};

const BILLING_PATTERNS: &[&str] = &[
    "402",
    "payment required",
    "insufficient credits",
    "insufficient_quota",
    "credit balance",
    "insufficient balance",
    "billing",
];

const AUTH_PATTERNS: &[&str] = &[
    "invalid_api_key",
    "invalid api key",
    "incorrect api key",
    "invalid token",
    "authentication",
    "unauthorized",
    "forbidden",
    "access denied",
    "token has expired",
    "401",
    "403",
    "no api key",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "too many requests",
    "429",
    "exceeded your current quota",
    "resource has been exhausted",
    "resource_exhausted",
    "quota exceeded",
];

const OVERLOADED_PATTERNS: &[&str] = &["overloaded", "server is busy", "capacity"];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "operation did not complete",
];

const FORMAT_PATTERNS: &[&str] = &[
    "string should match pattern",
    "tool_use.id",
    "tool_use_id",
    "tool_call_id",
    "must be followed by tool messages",
    "invalid request format",
];

/// Classify an error message string into a `ProviderError`.
///
/// # Example
/// ```
/// use clawcore::error::ProviderError;
/// use clawcore::providers::classify_error_message;
///
/// let err = classify_error_message("HTTP 429: Too many requests");
/// assert!(matches!(err, ProviderError::RateLimit(_)));
/// ```
pub fn classify_error_message(msg: &str) -> ProviderError {
    let lower = msg.to_lowercase();
    let owned = msg.to_string();

    if contains_any(&lower, BILLING_PATTERNS) {
        ProviderError::Billing(owned)
    } else if contains_any(&lower, AUTH_PATTERNS) {
        ProviderError::Auth(owned)
    } else if contains_any(&lower, RATE_LIMIT_PATTERNS) {
        ProviderError::RateLimit(owned)
    } else if contains_any(&lower, OVERLOADED_PATTERNS) {
        ProviderError::Overloaded(owned)
    } else if contains_any(&lower, TIMEOUT_PATTERNS) {
        ProviderError::Timeout(owned)
    } else if contains_any(&lower, FORMAT_PATTERNS) {
        ProviderError::Format(owned)
    } else {
        ProviderError::Unknown(owned)
    }
}

/// Turn any error returned by a provider call into a `ProviderError`.
///
/// Structured errors pass through untouched; everything else goes through
/// [`classify_error_message`].
pub fn classify_error(err: ClawError) -> ProviderError {
    match err {
        ClawError::ProviderTyped(pe) => pe,
        ClawError::Timeout { .. } => ProviderError::Timeout(err.to_string()),
        ClawError::Http(e) if e.is_timeout() => ProviderError::Timeout(e.to_string()),
        ClawError::Http(e) if e.is_connect() => ProviderError::ServerError(e.to_string()),
        ClawError::Json(e) => ProviderError::Format(e.to_string()),
        other => classify_error_message(&other.to_string()),
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limit_patterns() {
        assert!(matches!(
            classify_error_message("HTTP 429: Too many requests"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            classify_error_message("You exceeded your current quota"),
            ProviderError::RateLimit(_)
        ));
    }

    #[test]
    fn test_billing_wins_over_auth_on_402() {
        assert!(matches!(
            classify_error_message("HTTP 402 payment required"),
            ProviderError::Billing(_)
        ));
    }

    #[test]
    fn test_auth_patterns() {
        assert!(matches!(
            classify_error_message("invalid_api_key: The API key is invalid"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_error_message("HTTP 401: unauthorized"),
            ProviderError::Auth(_)
        ));
    }

    #[test]
    fn test_overloaded_and_timeout() {
        assert!(matches!(
            classify_error_message(r#"{"type":"overloaded_error"}"#),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            classify_error_message("request timed out after 120s"),
            ProviderError::Timeout(_)
        ));
    }

    #[test]
    fn test_format_patterns() {
        assert!(matches!(
            classify_error_message(
                "An assistant message with 'tool_calls' must be followed by tool messages"
            ),
            ProviderError::Format(_)
        ));
    }

    #[test]
    fn test_unknown_fallback() {
        assert!(matches!(
            classify_error_message("something completely unrecognized happened"),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn test_classify_error_passthrough() {
        let pe = classify_error(ClawError::ProviderTyped(ProviderError::Billing("x".into())));
        assert_eq!(pe, ProviderError::Billing("x".into()));
    }

    #[test]
    fn test_classify_error_timeout_variant() {
        let pe = classify_error(ClawError::timeout("provider call", Duration::from_secs(1)));
        assert!(matches!(pe, ProviderError::Timeout(_)));
    }

    #[test]
    fn test_classify_error_legacy_string() {
        let pe = classify_error(ClawError::Provider("rate limit reached".into()));
        assert!(matches!(pe, ProviderError::RateLimit(_)));
    }
}
