//! Session bookkeeping: one entry per session key, touched on every message.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::InboundMessage;

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_key: String,
    pub channel: String,
    pub chat_id: String,
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    #[serde(skip)]
    last_seen: Instant,
}

impl SessionInfo {
    fn from_message(msg: &InboundMessage) -> Self {
        let now = Utc::now();
        Self {
            session_key: msg.session_key.clone(),
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            thread_id: msg.thread_id.clone(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            last_seen: Instant::now(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, SessionInfo>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session on first sight, then record the activity.
    pub fn touch(&mut self, msg: &InboundMessage) -> &SessionInfo {
        let entry = self
            .sessions
            .entry(msg.session_key.clone())
            .or_insert_with(|| SessionInfo::from_message(msg));
        entry.last_activity = Utc::now();
        entry.last_seen = Instant::now();
        entry.message_count += 1;
        entry
    }

    pub fn get(&self, session_key: &str) -> Option<&SessionInfo> {
        self.sessions.get(session_key)
    }

    pub fn remove(&mut self, session_key: &str) -> Option<SessionInfo> {
        self.sessions.remove(session_key)
    }

    /// Drop sessions idle for longer than `idle`. Returns the pruned keys.
    pub fn prune_idle(&mut self, idle: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_for() > idle)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.sessions.remove(key);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_creates_then_updates() {
        let mut table = SessionTable::new();
        let msg = InboundMessage::new("cli", "u", "c", "one").with_thread("t");
        let created = table.touch(&msg).created_at;
        let info = table.touch(&msg);
        assert_eq!(info.message_count, 2);
        assert_eq!(info.created_at, created);
        assert_eq!(info.thread_id.as_deref(), Some("t"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_prune_idle() {
        let mut table = SessionTable::new();
        table.touch(&InboundMessage::new("cli", "u", "a", "x"));
        std::thread::sleep(Duration::from_millis(20));
        table.touch(&InboundMessage::new("cli", "u", "b", "x"));

        let pruned = table.prune_idle(Duration::from_millis(10));
        assert_eq!(pruned, vec!["cli:a".to_string()]);
        assert!(table.get("cli:b").is_some());
        assert!(table.prune_idle(Duration::from_secs(60)).is_empty());
    }
}
