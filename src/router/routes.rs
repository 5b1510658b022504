//! Route table: which handler gets a message.
//!
//! Routes are evaluated by route priority, highest first, insertion order
//! among equals. The first route whose predicates all match wins; otherwise
//! the default handler, if any.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::message::{InboundMessage, MessagePriority};
use crate::error::{ClawError, Result};

/// Processes a routed message. A returned text is sent back to the
/// message's session.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: InboundMessage) -> Result<Option<String>>;

    /// Called after the router forgets an idle session.
    async fn session_pruned(&self, _session_key: &str) {}
}

pub struct Route {
    pub name: String,
    pub priority: i32,
    channel: Option<String>,
    session_pattern: Option<Regex>,
    message_priority: Option<MessagePriority>,
    handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("channel", &self.channel)
            .field("session_pattern", &self.session_pattern.as_ref().map(Regex::as_str))
            .field("message_priority", &self.message_priority)
            .finish()
    }
}

impl Route {
    pub fn new(name: &str, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            name: name.to_string(),
            priority: 0,
            channel: None,
            session_pattern: None,
            message_priority: None,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    /// Match session keys against `pattern`. An invalid regex is a
    /// configuration error.
    pub fn for_sessions(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| ClawError::Config(format!("invalid session pattern '{}': {}", pattern, e)))?;
        self.session_pattern = Some(re);
        Ok(self)
    }

    pub fn for_message_priority(mut self, priority: MessagePriority) -> Self {
        self.message_priority = Some(priority);
        self
    }

    pub fn matches(&self, msg: &InboundMessage) -> bool {
        self.channel.as_ref().map_or(true, |c| c == &msg.channel)
            && self
                .session_pattern
                .as_ref()
                .map_or(true, |re| re.is_match(&msg.session_key))
            && self.message_priority.map_or(true, |p| p == msg.priority)
    }

    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    default: Option<Arc<dyn MessageHandler>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any route with the same name.
    pub fn add(&mut self, route: Route) {
        self.routes.retain(|r| r.name != route.name);
        // Stable sort keeps insertion order among equal priorities.
        self.routes.push(route);
        self.routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| r.name != name);
        self.routes.len() != before
    }

    pub fn set_default(&mut self, handler: Arc<dyn MessageHandler>) {
        self.default = Some(handler);
    }

    /// The route name (`"default"` for the fallback) and its handler.
    pub fn resolve(&self, msg: &InboundMessage) -> Option<(String, Arc<dyn MessageHandler>)> {
        self.routes
            .iter()
            .find(|r| r.matches(msg))
            .map(|r| (r.name.clone(), Arc::clone(&r.handler)))
            .or_else(|| {
                self.default
                    .as_ref()
                    .map(|h| ("default".to_string(), Arc::clone(h)))
            })
    }

    /// Every distinct handler, routes first, then the default.
    pub fn handlers(&self) -> Vec<Arc<dyn MessageHandler>> {
        let mut out: Vec<Arc<dyn MessageHandler>> = Vec::new();
        for handler in self.routes.iter().map(|r| &r.handler).chain(self.default.as_ref()) {
            if !out.iter().any(|h| Arc::ptr_eq(h, handler)) {
                out.push(Arc::clone(handler));
            }
        }
        out
    }

    pub fn names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        async fn handle(&self, _msg: InboundMessage) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn noop() -> Arc<dyn MessageHandler> {
        Arc::new(Noop)
    }

    #[test]
    fn test_highest_priority_first_match_wins() {
        let mut table = RouteTable::new();
        table.add(Route::new("any", noop()));
        table.add(Route::new("tg", noop()).for_channel("telegram").with_priority(10));
        table.add(
            Route::new("urgent", noop())
                .for_message_priority(MessagePriority::High)
                .with_priority(20),
        );

        let tg = InboundMessage::new("telegram", "u", "c", "x");
        assert_eq!(table.resolve(&tg).unwrap().0, "tg");

        let urgent = tg.clone().with_priority(MessagePriority::High);
        assert_eq!(table.resolve(&urgent).unwrap().0, "urgent");

        let other = InboundMessage::new("slack", "u", "c", "x");
        assert_eq!(table.resolve(&other).unwrap().0, "any");
        assert_eq!(table.names(), vec!["urgent", "tg", "any"]);
    }

    #[test]
    fn test_session_pattern_and_default() {
        let mut table = RouteTable::new();
        table.add(Route::new("ops", noop()).for_sessions(r"^slack:ops-").unwrap());

        let ops = InboundMessage::new("slack", "u", "ops-alerts", "x");
        assert_eq!(table.resolve(&ops).unwrap().0, "ops");

        let general = InboundMessage::new("slack", "u", "general", "x");
        assert!(table.resolve(&general).is_none());

        table.set_default(noop());
        assert_eq!(table.resolve(&general).unwrap().0, "default");
    }

    #[test]
    fn test_invalid_pattern_and_replace() {
        assert!(Route::new("bad", noop()).for_sessions("(").is_err());

        let mut table = RouteTable::new();
        table.add(Route::new("a", noop()).with_priority(1));
        table.add(Route::new("a", noop()).with_priority(5));
        assert_eq!(table.len(), 1);
        assert!(table.remove("a"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_handlers_are_distinct() {
        let shared = noop();
        let mut table = RouteTable::new();
        table.add(Route::new("a", Arc::clone(&shared)));
        table.add(Route::new("b", noop()));
        table.set_default(Arc::clone(&shared));
        assert_eq!(table.handlers().len(), 2);
    }
}
