//! Middleware pipeline run on every dequeued message.
//!
//! Each middleware receives the message and a [`Next`] handle. Calling
//! `next.run(msg)` passes the (possibly modified) message on; returning
//! `Ok(None)` without calling it filters the message out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use super::message::InboundMessage;
use crate::error::Result;

/// What the pipeline hands to routing: `None` means filtered out.
pub type MiddlewareResult = Result<Option<InboundMessage>>;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, msg: InboundMessage, next: Next<'_>) -> MiddlewareResult;
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { chain }
    }

    pub fn run(self, msg: InboundMessage) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            match self.chain.split_first() {
                Some((head, rest)) => head.process(msg, Next { chain: rest }).await,
                None => Ok(Some(msg)),
            }
        })
    }
}

/// Only lets through senders listed for their channel.
///
/// Channels without an entry, or with an empty list, are open.
#[derive(Debug, Clone, Default)]
pub struct AllowlistMiddleware {
    allow: HashMap<String, HashSet<String>>,
}

impl AllowlistMiddleware {
    pub fn new(allow: &HashMap<String, Vec<String>>) -> Self {
        Self {
            allow: allow
                .iter()
                .filter(|(_, senders)| !senders.is_empty())
                .map(|(channel, senders)| (channel.clone(), senders.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn is_allowed(&self, channel: &str, sender_id: &str) -> bool {
        self.allow
            .get(channel)
            .map_or(true, |senders| senders.contains(sender_id))
    }
}

#[async_trait]
impl Middleware for AllowlistMiddleware {
    fn name(&self) -> &str {
        "allowlist"
    }

    async fn process(&self, msg: InboundMessage, next: Next<'_>) -> MiddlewareResult {
        if !self.is_allowed(&msg.channel, &msg.sender_id) {
            debug!(channel = %msg.channel, sender = %msg.sender_id, "Sender not in allowlist");
            return Ok(None);
        }
        next.run(msg).await
    }
}

/// Drops messages with nothing but whitespace in them.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContentFilter;

#[async_trait]
impl Middleware for EmptyContentFilter {
    fn name(&self) -> &str {
        "empty_content"
    }

    async fn process(&self, msg: InboundMessage, next: Next<'_>) -> MiddlewareResult {
        if msg.content.trim().is_empty() {
            debug!(session_key = %msg.session_key, "Dropping empty message");
            return Ok(None);
        }
        next.run(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Middleware for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn process(&self, mut msg: InboundMessage, next: Next<'_>) -> MiddlewareResult {
            msg.content = msg.content.to_uppercase();
            next.run(msg).await
        }
    }

    async fn run(chain: Vec<Arc<dyn Middleware>>, msg: InboundMessage) -> MiddlewareResult {
        Next::new(&chain).run(msg).await
    }

    #[tokio::test]
    async fn test_empty_chain_passes_through() {
        let out = run(vec![], InboundMessage::new("cli", "u", "c", "hi")).await.unwrap();
        assert_eq!(out.unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_chain_modifies_and_short_circuits() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(EmptyContentFilter), Arc::new(Upper)];
        let out = run(chain.clone(), InboundMessage::new("cli", "u", "c", "hi")).await.unwrap();
        assert_eq!(out.unwrap().content, "HI");

        let out = run(chain, InboundMessage::new("cli", "u", "c", "  \n")).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_allowlist() {
        let mut allow = HashMap::new();
        allow.insert("telegram".to_string(), vec!["alice".to_string()]);
        allow.insert("slack".to_string(), vec![]);
        let mw: Vec<Arc<dyn Middleware>> = vec![Arc::new(AllowlistMiddleware::new(&allow))];

        let ok = run(mw.clone(), InboundMessage::new("telegram", "alice", "c", "x")).await;
        assert!(ok.unwrap().is_some());
        let blocked = run(mw.clone(), InboundMessage::new("telegram", "mallory", "c", "x")).await;
        assert!(blocked.unwrap().is_none());
        let open = run(mw, InboundMessage::new("slack", "anyone", "c", "x")).await;
        assert!(open.unwrap().is_some());
    }
}
