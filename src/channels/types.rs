//! Channel adapter seam.
//!
//! An adapter owns the wire protocol of one messaging platform. The router
//! only needs to send through it; inbound traffic arrives as
//! [`AdapterEvent`]s over a channel (see `MessageRouter::attach_adapter`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::router::{InboundMessage, OutboundMessage};

/// Outcome of a send as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendReceipt {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Something an adapter observed.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Message(InboundMessage),
    Connected,
    Disconnected { reason: Option<String> },
    Error(String),
}

/// The interface every channel adapter implements.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use clawcore::channels::{ChannelAdapter, SendReceipt};
/// use clawcore::router::OutboundMessage;
/// use clawcore::error::Result;
///
/// struct Stdout;
///
/// #[async_trait]
/// impl ChannelAdapter for Stdout {
///     fn name(&self) -> &str {
///         "stdout"
///     }
///
///     async fn send(&self, msg: OutboundMessage) -> Result<SendReceipt> {
///         println!("{}", msg.content);
///         Ok(SendReceipt::ok())
///     }
/// }
/// ```
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel name; also the `channel` field of its inbound messages.
    fn name(&self) -> &str;

    async fn send(&self, msg: OutboundMessage) -> Result<SendReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipts() {
        let ok = SendReceipt::ok().with_message_id("42");
        assert!(ok.ok);
        assert_eq!(ok.message_id.as_deref(), Some("42"));

        let failed = SendReceipt::failed("rate limited");
        assert!(!failed.ok);
        let json = serde_json::to_string(&failed).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"rate limited"}"#);
    }
}
