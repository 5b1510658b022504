//! Error types for ClawCore
//!
//! This module defines all error types used throughout the execution core.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Provides fine-grained categorization of LLM provider failures so the
/// failover layer can decide between local retry, skipping to the next
/// candidate, and how long to cool a provider down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401/403 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 402 — Payment required or billing issue
    Billing(String),
    /// 500/502/503/504 — Server-side errors
    ServerError(String),
    /// 400 — Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 — Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection, read or call timeout
    Timeout(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
    /// Provider is overloaded — retry with backoff
    Overloaded(String),
    /// Request format error (e.g. malformed tool call id) — do not retry
    Format(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Format(msg) => write!(f, "Format error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the request should be retried.
    ///
    /// Retryable errors: RateLimit, ServerError, Timeout, Overloaded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns `true` if the failover loop should abandon the current candidate
    /// immediately instead of spending its remaining local attempts.
    ///
    /// Auth, billing and request-format failures will not heal on retry
    /// against the same backend; a different backend may still succeed.
    pub fn skips_local_retry(&self) -> bool {
        matches!(
            self,
            ProviderError::Auth(_)
                | ProviderError::Billing(_)
                | ProviderError::Format(_)
                | ProviderError::InvalidRequest(_)
                | ProviderError::ModelNotFound(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) => None,
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Format(_) => Some(400),
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for ClawError {
    fn from(err: ProviderError) -> Self {
        ClawError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for ClawCore operations.
#[derive(Error, Debug)]
pub enum ClawError {
    /// Configuration-related errors (invalid config, missing fields, lifecycle misuse)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unclassified provider failure. Classified on the way into the failover loop.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry/fallback decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// No registered provider satisfies the requested role, tier or tool support.
    #[error("No provider available: {0}")]
    NoProviderAvailable(String),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// A tool was requested repeatedly despite not being allowed for the run.
    #[error("Tool blocked by policy: {0}")]
    ToolPolicyDenied(String),

    /// History could not be compacted below the context budget.
    #[error("Context overflow: estimated {estimated} tokens against a budget of {budget}")]
    ContextOverflow { estimated: usize, budget: usize },

    /// The run used every iteration without producing a final answer.
    #[error("Reached maximum iterations ({0}) without a final answer")]
    MaxIterationsReached(u32),

    /// A bounded operation did not finish in time.
    #[error("Timeout: {operation} did not complete within {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The model produced tool-call markup that could not be recovered.
    #[error("Tool call parse error: {0}")]
    ToolCallParse(String),

    /// Channel adapter errors (send failures, unknown channels, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Router errors (stopped router, unroutable messages, etc.)
    #[error("Router error: {0}")]
    Router(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found (sessions, tools, providers, etc.)
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ClawError {
    /// Build a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        ClawError::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }
}

/// A specialized `Result` type for ClawCore operations.
pub type Result<T> = std::result::Result<T, ClawError>;
