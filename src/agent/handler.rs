//! Router handler that feeds messages through an [`AgentEngine`].
//!
//! Keeps a bounded history per session and serializes runs within a session
//! so replies stay in order. Different sessions run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::router::{InboundMessage, MessageHandler};
use crate::session::Message;

use super::compaction::is_summary;
use super::engine::{AgentEngine, AgentInput, AgentOutput, CronContext};

/// Metadata key selecting a tool profile for one message.
pub const TOOL_POLICY_KEY: &str = "tool_policy";
/// Metadata key marking a message as a scheduled job; the value is the job id.
pub const CRON_JOB_KEY: &str = "cron_job";

pub struct AgentHandler {
    engine: Arc<AgentEngine>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentHandler {
    pub fn new(engine: Arc<AgentEngine>) -> Self {
        Self {
            engine,
            histories: Mutex::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<AgentEngine> {
        &self.engine
    }

    /// Run one message and return the full engine output.
    pub async fn process(&self, msg: &InboundMessage) -> AgentOutput {
        let lock = {
            let mut locks = self.session_locks.lock().await;
            Arc::clone(locks.entry(msg.session_key.clone()).or_default())
        };
        let _guard = lock.lock().await;

        let history = self
            .histories
            .lock()
            .await
            .get(&msg.session_key)
            .cloned()
            .unwrap_or_default();

        let mut input = AgentInput::new(&msg.session_key, &msg.channel, &msg.content)
            .with_history(history.clone())
            .with_chat_id(Some(&msg.chat_id));
        if let Some(policy) = msg.metadata.get(TOOL_POLICY_KEY) {
            input = input.with_tool_policy(policy);
        }
        if let Some(job_id) = msg.metadata.get(CRON_JOB_KEY) {
            input = input.with_cron(CronContext {
                job_id: job_id.clone(),
                schedule: msg.metadata.get("cron_schedule").cloned(),
            });
        }

        let output = self.engine.execute(input).await;
        if let Some(ref e) = output.error {
            warn!(session_key = %msg.session_key, error = %e, "Agent run ended with error");
        }

        // A run that failed before building its prompt has no transcript;
        // the stored conversation survives and gains the unanswered query.
        let transcript = if output.messages.is_empty() {
            let mut carried = history;
            if !msg.content.is_empty() {
                carried.push(Message::user(&msg.content));
            }
            carried
        } else {
            output.messages.clone()
        };
        let kept = bounded_history(transcript, self.engine.config().max_session_messages);
        debug!(session_key = %msg.session_key, messages = kept.len(), "History stored");
        self.histories
            .lock()
            .await
            .insert(msg.session_key.clone(), kept);

        output
    }

    pub async fn history(&self, session_key: &str) -> Vec<Message> {
        self.histories
            .lock()
            .await
            .get(session_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget the stored history of a session.
    pub async fn clear_session(&self, session_key: &str) -> bool {
        self.session_locks.lock().await.remove(session_key);
        self.histories.lock().await.remove(session_key).is_some()
    }
}

#[async_trait]
impl MessageHandler for AgentHandler {
    async fn handle(&self, msg: InboundMessage) -> Result<Option<String>> {
        let output = self.process(&msg).await;
        Ok(Some(output.response))
    }

    async fn session_pruned(&self, session_key: &str) {
        if self.clear_session(session_key).await {
            debug!(session_key, "Dropped history of pruned session");
        }
    }
}

/// Keep the most recent `max` messages, never starting on a tool result.
/// A leading compaction summary survives the cut.
fn bounded_history(mut messages: Vec<Message>, max: usize) -> Vec<Message> {
    let summary = match messages.first() {
        Some(first) if is_summary(first) && max > 1 => Some(messages.remove(0)),
        _ => None,
    };
    let max = max - usize::from(summary.is_some());
    if messages.len() > max {
        messages.drain(..messages.len() - max);
    }
    let leading = messages.iter().take_while(|m| m.is_tool_result()).count();
    messages.drain(..leading);
    if let Some(summary) = summary {
        messages.insert(0, summary);
    }
    messages
}
