//! Message types exchanged between channel adapters and the router.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatch priority of an inbound message. Higher is served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A normalized message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The channel this message came from (e.g., "telegram", "discord")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Unique identifier of the chat/conversation
    pub chat_id: String,
    /// Thread inside the chat, for channels that have them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// The text content of the message
    pub content: String,
    /// Session key for routing (format: "channel:chat_id[:thread_id]")
    pub session_key: String,
    #[serde(default)]
    pub priority: MessagePriority,
    /// Additional metadata key-value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

fn session_key_for(channel: &str, chat_id: &str, thread_id: Option<&str>) -> String {
    match thread_id {
        Some(thread) => format!("{}:{}:{}", channel, chat_id, thread),
        None => format!("{}:{}", channel, chat_id),
    }
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// # Example
    /// ```
    /// use clawcore::router::InboundMessage;
    ///
    /// let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello, bot!");
    /// assert_eq!(msg.session_key, "telegram:chat456");
    ///
    /// let threaded = msg.with_thread("t1");
    /// assert_eq!(threaded.session_key, "telegram:chat456:t1");
    /// ```
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            thread_id: None,
            content: content.to_string(),
            session_key: session_key_for(channel, chat_id, None),
            priority: MessagePriority::Normal,
            metadata: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Place the message in a thread. The session key follows the thread.
    pub fn with_thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self.session_key = session_key_for(&self.channel, &self.chat_id, Some(thread_id));
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the derived session key.
    pub fn with_session_key(mut self, session_key: &str) -> Self {
        self.session_key = session_key.to_string();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A message to be sent through a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub content: String,
    /// Optional message ID to reply to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            thread_id: None,
            content: content.to_string(),
            reply_to: None,
        }
    }

    pub fn with_thread(mut self, thread_id: Option<&str>) -> Self {
        self.thread_id = thread_id.map(str::to_string);
        self
    }

    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Reply in the same chat and thread as `msg`.
    ///
    /// # Example
    /// ```
    /// use clawcore::router::{InboundMessage, OutboundMessage};
    ///
    /// let inbound = InboundMessage::new("slack", "u1", "C42", "hi").with_thread("T9");
    /// let reply = OutboundMessage::reply_to(&inbound, "hello");
    /// assert_eq!(reply.chat_id, "C42");
    /// assert_eq!(reply.thread_id.as_deref(), Some("T9"));
    /// ```
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        Self::new(&msg.channel, &msg.chat_id, content).with_thread(msg.thread_id.as_deref())
    }
}
