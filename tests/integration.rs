//! Integration tests for ClawCore
//!
//! These tests wire the public pieces together: scripted providers behind a
//! `ProviderManager`, the `AgentEngine`, and a `MessageRouter` delivering to
//! recording adapters. No network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::Semaphore;

use clawcore::agent::compaction::SUMMARY_HEADER;
use clawcore::agent::{
    estimate_messages, AgentEngine, AgentHandler, AgentInput, CompactionStrategy, RunEvent,
    RunEventSink, RunOutcome, TOOL_POLICY_KEY,
};
use clawcore::channels::{ChannelAdapter, SendReceipt};
use clawcore::config::Config;
use clawcore::error::{ClawError, ProviderError, Result};
use clawcore::providers::{
    ChatOptions, CooldownPolicy, LLMProvider, LLMResponse, LLMToolCall, ProviderEvent,
    ProviderManager, ProviderProfile, ProviderRequest, ProviderRole, RetryPolicy, SelectOptions,
    ToolDefinition,
};
use clawcore::router::{
    InboundMessage, MessageHandler, MessagePriority, MessageRouter, OutboundMessage, Route,
    RouterSignal,
};
use clawcore::session::{Message, ToolCall};
use clawcore::tools::{EchoTool, Tool, ToolContext, ToolRegistry, ToolResult};
use clawcore::utils::metrics::RunMetrics;

// ============================================================================
// Fixtures
// ============================================================================

/// Replays a script of responses; the last entry repeats.
struct Scripted {
    script: Mutex<VecDeque<std::result::Result<LLMResponse, ProviderError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl Scripted {
    fn new(script: Vec<std::result::Result<LLMResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for Scripted {
    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        self.seen.lock().unwrap().push(messages);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        };
        next.map_err(ClawError::ProviderTyped)
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Counts executions; used to prove denied tools never run.
struct Counting {
    name: &'static str,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Counts its invocations"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::text("ran"))
    }
}

/// Answers only after `delay`.
struct Slow {
    delay: Duration,
}

#[async_trait]
impl LLMProvider for Slow {
    async fn chat(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        tokio::time::sleep(self.delay).await;
        Ok(LLMResponse::text("too late"))
    }

    fn default_model(&self) -> &str {
        "slow"
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<RunEvent>>,
}

impl EventLog {
    fn compactions(&self) -> Vec<(CompactionStrategy, usize, usize)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RunEvent::ContextCompacted {
                    strategy,
                    before,
                    after,
                    ..
                } => Some((*strategy, *before, *after)),
                _ => None,
            })
            .collect()
    }
}

impl RunEventSink for EventLog {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct RecordingAdapter {
    sent: Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn name(&self) -> &str {
        "test"
    }

    async fn send(&self, msg: OutboundMessage) -> Result<SendReceipt> {
        self.sent.lock().unwrap().push(msg);
        Ok(SendReceipt::ok().with_message_id("1"))
    }
}

fn call(id: &str, name: &str, args: &str) -> LLMResponse {
    LLMResponse::with_tools("", vec![LLMToolCall::new(id, name, args)])
}

fn manager(providers: Vec<(ProviderProfile, Arc<Scripted>)>) -> Arc<ProviderManager> {
    let manager = ProviderManager::new()
        .with_retry_policy(RetryPolicy::immediate(1, 1))
        .with_call_timeout(Duration::from_secs(5));
    for (profile, provider) in providers {
        manager.register(profile, provider).unwrap();
    }
    manager.initialize().unwrap();
    Arc::new(manager)
}

/// `count` alternating user/assistant messages of exactly `chars` characters.
fn padded_history(count: usize, chars: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            let head = format!("SECRET{} ", i);
            let text = format!("{}{}", head, "x".repeat(chars - head.len()));
            if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant(&text)
            }
        })
        .collect()
}

fn counting_registry(runs: &Arc<AtomicUsize>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(Counting {
        name: "counter",
        runs: Arc::clone(runs),
    }));
    registry
}

fn engine(config: &Config, provider: Arc<Scripted>, registry: ToolRegistry) -> AgentEngine {
    let providers = manager(vec![(ProviderProfile::new("main", "m"), provider)]);
    AgentEngine::new(config, providers, Arc::new(registry))
}

// ============================================================================
// Router → agent → adapter
// ============================================================================

#[tokio::test]
async fn test_router_runs_agent_and_replies() {
    let provider = Scripted::new(vec![
        Ok(call("c1", "echo", r#"{"message":"pong"}"#)),
        Ok(LLMResponse::text("The echo said pong.")),
    ]);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    let engine = Arc::new(engine(&Config::default(), provider.clone(), registry));
    let handler = Arc::new(AgentHandler::new(engine));

    let router = MessageRouter::new(Config::default().router);
    let adapter = Arc::new(RecordingAdapter::default());
    router.register_adapter(adapter.clone(), None).unwrap();
    router.set_default_handler(handler.clone());

    let msg = InboundMessage::new("test", "alice", "room-1", "ping please");
    let session_key = msg.session_key.clone();
    router.handle_inbound(msg).unwrap();
    assert!(router.stop(Some(Duration::from_secs(5))).await);

    let sent = adapter.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_id, "room-1");
    assert_eq!(sent[0].content, "The echo said pong.");

    assert_eq!(provider.calls(), 2);
    // user, assistant(tool call), tool result, assistant
    assert_eq!(handler.history(&session_key).await.len(), 4);
}

#[tokio::test]
async fn test_router_priority_order() {
    struct Gated {
        order: Mutex<Vec<String>>,
        gate: Semaphore,
    }

    #[async_trait]
    impl MessageHandler for Gated {
        async fn handle(&self, msg: InboundMessage) -> Result<Option<String>> {
            self.order.lock().unwrap().push(msg.content.clone());
            let _permit = self.gate.acquire().await;
            Ok(None)
        }
    }

    let router = MessageRouter::new(Config::default().router);
    router
        .register_adapter(Arc::new(RecordingAdapter::default()), None)
        .unwrap();
    let handler = Arc::new(Gated {
        order: Mutex::new(Vec::new()),
        gate: Semaphore::new(0),
    });
    router.set_default_handler(handler.clone());

    // Occupies the single dispatch slot so the rest queue up.
    router.handle_inbound(InboundMessage::new("test", "u", "c", "blocker")).unwrap();
    for (content, priority) in [
        ("high-1", MessagePriority::High),
        ("normal", MessagePriority::Normal),
        ("high-2", MessagePriority::High),
        ("low", MessagePriority::Low),
    ] {
        router
            .handle_inbound(InboundMessage::new("test", "u", "c", content).with_priority(priority))
            .unwrap();
    }
    assert_eq!(router.queue_len("test"), 4);

    handler.gate.add_permits(10);
    assert!(router.stop(Some(Duration::from_secs(5))).await);
    assert_eq!(
        *handler.order.lock().unwrap(),
        vec!["blocker", "high-1", "high-2", "normal", "low"]
    );
}

#[tokio::test]
async fn test_router_full_queue_drops_without_blocking() {
    struct Never;

    #[async_trait]
    impl MessageHandler for Never {
        async fn handle(&self, _msg: InboundMessage) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    let mut config = Config::default().router;
    config.queue_capacity = 2;
    let router = MessageRouter::new(config);
    router
        .register_adapter(Arc::new(RecordingAdapter::default()), None)
        .unwrap();
    router.set_default_handler(Arc::new(Never));
    let mut signals = router.subscribe();

    for i in 0..3 {
        router
            .handle_inbound(InboundMessage::new("test", "u", "c", &format!("m{}", i)))
            .unwrap();
    }
    // One in flight, two queued; the next one overflows.
    let err = router
        .handle_inbound(InboundMessage::new("test", "u", "c", "overflow"))
        .unwrap_err();
    assert!(matches!(err, ClawError::Router(_)));
    assert!(matches!(
        signals.recv().await.unwrap(),
        RouterSignal::Dropped { .. }
    ));
    assert!(!router.stop(Some(Duration::from_millis(50))).await);
}

#[tokio::test]
async fn test_routes_and_idle_session_pruning() {
    struct Fixed(&'static str);

    #[async_trait]
    impl MessageHandler for Fixed {
        async fn handle(&self, _msg: InboundMessage) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    let router = MessageRouter::new(Config::default().router);
    let adapter = Arc::new(RecordingAdapter::default());
    router.register_adapter(adapter.clone(), None).unwrap();
    router.set_default_handler(Arc::new(Fixed("general")));
    router.add_route(
        Route::new("ops", Arc::new(Fixed("ops")))
            .for_sessions("^test:ops-")
            .unwrap()
            .with_priority(10),
    );

    router.handle_inbound(InboundMessage::new("test", "u", "ops-1", "x")).unwrap();
    router.handle_inbound(InboundMessage::new("test", "u", "lobby", "x")).unwrap();
    assert!(router.stop(Some(Duration::from_secs(5))).await);

    let mut replies: Vec<(String, String)> = adapter
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|m| (m.chat_id.clone(), m.content.clone()))
        .collect();
    replies.sort();
    assert_eq!(
        replies,
        vec![
            ("lobby".to_string(), "general".to_string()),
            ("ops-1".to_string(), "ops".to_string()),
        ]
    );

    assert_eq!(router.session_count(), 2);
    assert_eq!(router.prune_sessions_idle_for(Duration::ZERO), 2);
    assert_eq!(router.session_count(), 0);
}

#[tokio::test]
async fn test_pruned_session_frees_agent_history() {
    let provider = Scripted::new(vec![Ok(LLMResponse::text("hello"))]);
    let engine = Arc::new(engine(&Config::default(), provider, ToolRegistry::new()));
    let handler = Arc::new(AgentHandler::new(engine));

    let router = MessageRouter::new(Config::default().router);
    router
        .register_adapter(Arc::new(RecordingAdapter::default()), None)
        .unwrap();
    router.set_default_handler(handler.clone());

    let msg = InboundMessage::new("test", "alice", "room-1", "hi");
    let session_key = msg.session_key.clone();
    router.handle_inbound(msg).unwrap();
    assert!(router.stop(Some(Duration::from_secs(5))).await);
    assert_eq!(handler.history(&session_key).await.len(), 2);

    assert_eq!(router.prune_sessions_idle_for(Duration::ZERO), 1);
    let deadline = Instant::now() + Duration::from_secs(2);
    while !handler.history(&session_key).await.is_empty() {
        assert!(Instant::now() < deadline, "history outlived its session");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_provider_outage_keeps_session_history() {
    let provider = Scripted::new(vec![
        Ok(LLMResponse::text("one")),
        Err(ProviderError::Auth("401 invalid key".into())),
    ]);
    let manager = ProviderManager::new()
        .with_retry_policy(RetryPolicy::immediate(1, 1))
        .with_cooldown_policy(CooldownPolicy::uniform(Duration::from_secs(60)));
    manager
        .register(ProviderProfile::new("main", "m"), provider)
        .unwrap();
    manager.initialize().unwrap();
    let engine = AgentEngine::new(
        &Config::default(),
        Arc::new(manager),
        Arc::new(ToolRegistry::new()),
    );
    let handler = AgentHandler::new(Arc::new(engine));

    let turn = |text: &str| InboundMessage::new("test", "alice", "room-1", text);
    let session_key = turn("").session_key;

    assert!(handler.process(&turn("one")).await.error.is_none());
    assert!(handler.process(&turn("two")).await.error.is_some());
    // The provider is cooling down, so this run never builds a prompt.
    let out = handler.process(&turn("three")).await;
    assert!(out.error.is_some());
    assert!(out.provider_id.is_none());

    let history = handler.history(&session_key).await;
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "one", "two", "three"]);
}

// ============================================================================
// Agent engine
// ============================================================================

#[tokio::test]
async fn test_three_denials_continue_fourth_aborts() {
    let mut config = Config::default();
    config
        .tool_profiles
        .insert("safe".into(), Some(vec!["echo".to_string()]));

    let registry = |runs: &Arc<AtomicUsize>| {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(Counting {
            name: "shell",
            runs: Arc::clone(runs),
        }));
        registry
    };

    let runs = Arc::new(AtomicUsize::new(0));
    let provider = Scripted::new(vec![
        Ok(call("c1", "shell", "{}")),
        Ok(call("c2", "shell", "{}")),
        Ok(call("c3", "shell", "{}")),
        Ok(LLMResponse::text("I could not use the shell.")),
    ]);
    let out = engine(&config, provider, registry(&runs))
        .execute(AgentInput::new("s", "cli", "list files").with_tool_policy("safe"))
        .await;
    assert_eq!(out.outcome, RunOutcome::Success);
    assert_eq!(out.response, "I could not use the shell.");
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let provider = Scripted::new(vec![Ok(call("c", "shell", "{}"))]);
    let out = engine(&config, provider.clone(), registry(&runs))
        .execute(AgentInput::new("s", "cli", "list files").with_tool_policy("safe"))
        .await;
    assert_eq!(out.outcome, RunOutcome::Error);
    assert!(out.error.unwrap().contains("Tool blocked by policy"));
    assert_eq!(provider.calls(), 4);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_tool_policy_from_metadata() {
    let mut config = Config::default();
    config.tool_profiles.insert("none".into(), Some(vec![]));
    let provider = Scripted::new(vec![
        Ok(call("c1", "echo", r#"{"message":"x"}"#)),
        Ok(LLMResponse::text("done")),
    ]);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    let handler = AgentHandler::new(Arc::new(engine(&config, provider, registry)));

    let msg = InboundMessage::new("test", "u", "c", "echo x").with_metadata(TOOL_POLICY_KEY, "none");
    let out = handler.process(&msg).await;
    assert_eq!(out.outcome, RunOutcome::Success);
    assert!(out.tools_used.is_empty());
    let denied = out.messages.iter().find(|m| m.is_tool_result()).unwrap();
    assert!(!ToolResult::parse(&denied.content).unwrap().is_success());
}

#[tokio::test]
async fn test_orphaned_history_tool_call_gets_interrupted_result() {
    let provider = Scripted::new(vec![Ok(LLMResponse::text("resumed"))]);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    let engine = engine(&Config::default(), provider.clone(), registry);

    let history = vec![
        Message::user("echo hi"),
        Message::assistant_with_tools("", vec![ToolCall::new("lost", "echo", "{}")]),
    ];
    let out = engine
        .execute(AgentInput::new("s", "cli", "are you there?").with_history(history))
        .await;
    assert_eq!(out.outcome, RunOutcome::Success);

    let seen = provider.seen.lock().unwrap();
    let repaired = seen[0]
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("lost"))
        .expect("synthetic result inserted");
    let result = ToolResult::parse(&repaired.content).unwrap();
    assert!(result.error().unwrap().contains("interrupted"));
}

#[tokio::test]
async fn test_long_history_compacted_before_provider_call() {
    let mut config = Config::default();
    config.compaction.max_history_tokens = 2_000;
    config.compaction.max_summary_chars = 400;
    config.compaction.proactive.threshold = 0.5;
    config.compaction.proactive.min_recent = 2;

    let history: Vec<Message> = (0..20)
        .map(|i| {
            let text = format!("turn {} {}", i, "lorem ipsum ".repeat(16));
            if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant(&text)
            }
        })
        .collect();

    let provider = Scripted::new(vec![Ok(LLMResponse::text("short answer"))]);
    let metrics = Arc::new(RunMetrics::new());
    let engine =
        engine(&config, provider.clone(), ToolRegistry::new()).with_sink(metrics.clone());
    let out = engine
        .execute(AgentInput::new("s", "cli", "summarize please").with_history(history))
        .await;

    assert_eq!(out.outcome, RunOutcome::Success);
    assert!(metrics.snapshot().compactions >= 1);
    let seen = provider.seen.lock().unwrap();
    assert!(seen[0].len() < 10, "provider saw {} messages", seen[0].len());
    assert_eq!(seen[0].last().unwrap().content, "summarize please");
}

#[tokio::test]
async fn test_summary_carried_into_next_turn() {
    let mut config = Config::default();
    config.compaction.max_history_tokens = 1_000;
    config.compaction.max_summary_chars = 200;

    let provider = Scripted::new(vec![Ok(LLMResponse::text("answer"))]);
    let engine = engine(&config, provider.clone(), ToolRegistry::new());
    let out = engine
        .execute(AgentInput::new("s", "cli", "go").with_history(padded_history(24, 120)))
        .await;
    assert_eq!(out.outcome, RunOutcome::Success);

    let summary = &out.messages[0];
    assert!(summary.content.starts_with(SUMMARY_HEADER));
    assert!(summary.content.contains("SECRET0"));
    assert_eq!(out.messages.last().unwrap().content, "answer");

    engine
        .execute(AgentInput::new("s", "cli", "again").with_history(out.messages.clone()))
        .await;
    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[1][1], *summary);
}

#[tokio::test]
async fn test_emergency_compaction_mid_run() {
    let mut config = Config::default();
    config.compaction.max_history_tokens = 1_000;
    config.compaction.max_summary_chars = 200;
    config.compaction.proactive.enabled = false;
    config.compaction.reactive.enabled = false;

    let blob = json!({ "blob": "y".repeat(200) }).to_string();
    let provider = Scripted::new(vec![
        Ok(call("c1", "counter", &blob)),
        Ok(LLMResponse::text("done")),
    ]);
    let runs = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(EventLog::default());
    let engine = engine(&config, provider.clone(), counting_registry(&runs)).with_sink(log.clone());

    let out = engine
        .execute(AgentInput::new("s", "cli", "go").with_history(padded_history(10, 200)))
        .await;
    assert_eq!(out.outcome, RunOutcome::Success);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let compactions = log.compactions();
    assert_eq!(compactions.len(), 1);
    let (strategy, before, after) = compactions[0];
    assert_eq!(strategy, CompactionStrategy::EmergencySummarize);
    assert!(before >= 500, "before = {}", before);
    assert!(after < 500, "after = {}", after);

    // Compacted after the tool-call turn was appended, before the tool ran.
    let seen = provider.seen.lock().unwrap();
    let second = &seen[1];
    assert!(estimate_messages(second) < 500);
    assert!(second[1].content.starts_with(SUMMARY_HEADER));
    let call_at = second
        .iter()
        .position(|m| m.has_tool_calls())
        .expect("tool-call turn kept");
    assert_eq!(second[call_at + 1].tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_irreducible_context_ends_run_with_error() {
    let mut config = Config::default();
    config.compaction.max_history_tokens = 1_000;

    let blob = json!({ "blob": "z".repeat(4_400) }).to_string();
    let provider = Scripted::new(vec![Ok(call("c1", "counter", &blob))]);
    let runs = Arc::new(AtomicUsize::new(0));
    let out = engine(&config, provider, counting_registry(&runs))
        .execute(AgentInput::new("s", "cli", "go"))
        .await;

    assert_eq!(out.outcome, RunOutcome::Error);
    assert!(out.response.starts_with("Sorry"));
    assert!(out.error.unwrap().contains("Context overflow"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reactive_compaction_after_tool_results() {
    let mut config = Config::default();
    config.compaction.max_history_tokens = 1_000;
    config.compaction.max_summary_chars = 200;
    config.compaction.proactive.enabled = false;
    config.compaction.emergency.enabled = false;

    let provider = Scripted::new(vec![
        Ok(call("c1", "counter", "{}")),
        Ok(LLMResponse::text("done")),
    ]);
    let runs = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(EventLog::default());
    let engine = engine(&config, provider.clone(), counting_registry(&runs)).with_sink(log.clone());

    let out = engine
        .execute(AgentInput::new("s", "cli", "go").with_history(padded_history(12, 200)))
        .await;
    assert_eq!(out.outcome, RunOutcome::Success);

    let compactions = log.compactions();
    assert_eq!(compactions.len(), 1);
    assert_eq!(compactions[0].0, CompactionStrategy::Reactive);
    assert!(compactions[0].2 < compactions[0].1);

    // system, summary, then the last four: history, query, call, result
    let seen = provider.seen.lock().unwrap();
    let second = &seen[1];
    assert_eq!(second.len(), 6);
    assert!(second[1].content.starts_with(SUMMARY_HEADER));
    assert!(second[5].is_tool_result());
}

#[tokio::test]
async fn test_iteration_timeout_ends_run() {
    let manager = ProviderManager::new()
        .with_retry_policy(RetryPolicy::immediate(1, 1))
        .with_call_timeout(Duration::from_secs(5));
    manager
        .register(
            ProviderProfile::new("slow", "s"),
            Arc::new(Slow {
                delay: Duration::from_secs(2),
            }),
        )
        .unwrap();
    manager.initialize().unwrap();
    let engine = AgentEngine::new(
        &Config::default(),
        Arc::new(manager),
        Arc::new(ToolRegistry::new()),
    )
    .with_iteration_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let out = engine.execute(AgentInput::new("s", "cli", "hello")).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(out.outcome, RunOutcome::Error);
    assert!(out.error.unwrap().contains("Timeout"));
    assert_eq!(out.iterations, 1);
}

// ============================================================================
// Provider failover
// ============================================================================

#[tokio::test]
async fn test_rate_limited_provider_leaves_and_reenters() {
    let primary = Scripted::new(vec![
        Err(ProviderError::RateLimit("slow down".into())),
        Ok(LLMResponse::text("primary again")),
    ]);
    let backup = Scripted::new(vec![Ok(LLMResponse::text("backup"))]);

    let manager = ProviderManager::new()
        .with_retry_policy(RetryPolicy::immediate(1, 1))
        .with_cooldown_policy(CooldownPolicy::uniform(Duration::from_millis(60)))
        .with_fallback_chain(vec!["backup".into()]);
    manager
        .register(ProviderProfile::new("primary", "p"), primary.clone())
        .unwrap();
    manager
        .register(ProviderProfile::new("backup", "b"), backup.clone())
        .unwrap();
    manager.initialize().unwrap();
    let mut events = manager.subscribe();

    let request = || ProviderRequest::new(vec![Message::user("hi")], ProviderRole::Chat);
    let opts = SelectOptions::for_role(ProviderRole::Chat);

    let reply = manager
        .call_provider_with_fallback(request(), "primary")
        .await
        .unwrap();
    assert_eq!(reply.provider_id, "backup");
    assert_eq!(reply.attempts, 2);
    assert!(manager.is_in_cooldown("primary"));
    assert_eq!(
        manager.get_prioritized_provider_ids("primary", &opts),
        vec!["backup"]
    );
    assert!(matches!(
        events.recv().await.unwrap(),
        ProviderEvent::Failed { ref provider_id, .. } if provider_id == "primary"
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        manager.get_prioritized_provider_ids("primary", &opts),
        vec!["primary", "backup"]
    );
    let reply = manager
        .call_provider_with_fallback(request(), "primary")
        .await
        .unwrap();
    assert_eq!(reply.provider_id, "primary");
    assert_eq!(reply.response.content, "primary again");
    assert_eq!(
        events.recv().await.unwrap(),
        ProviderEvent::Recovered {
            provider_id: "primary".into()
        }
    );
}

#[tokio::test]
async fn test_all_providers_failing_yields_apology() {
    let provider = Scripted::new(vec![Err(ProviderError::ServerError("boom".into()))]);
    let out = engine(&Config::default(), provider, ToolRegistry::new())
        .execute(AgentInput::new("s", "cli", "hello"))
        .await;
    assert_eq!(out.outcome, RunOutcome::Error);
    assert!(out.response.starts_with("Sorry"));
    assert!(out.error.is_some());
    assert!(!out.run_id.is_empty());
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_config_file_drives_engine_and_router() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "agent": {"max_iterations": 2, "agent_name": "Tester"},
            "router": {"queue_capacity": 7, "channels": {"test": {"max_concurrency": 3}}},
            "tool_profiles": {"everything": null}
        }"#,
    )
    .unwrap();
    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.agent.max_iterations, 2);
    assert_eq!(config.tool_profiles.get("everything"), Some(&None));

    let opts = clawcore::router::AdapterOptions::from_config(&config.router, "test");
    assert_eq!((opts.capacity, opts.max_concurrency), (7, 3));

    let provider = Scripted::new(vec![Ok(call("c", "echo", r#"{"message":"again"}"#))]);
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    let out = engine(&config, provider.clone(), registry)
        .execute(AgentInput::new("s", "cli", "loop").with_tool_policy("everything"))
        .await;
    assert_eq!(out.outcome, RunOutcome::MaxIterationsReached);
    assert_eq!(out.iterations, 2);
    assert_eq!(provider.calls(), 2);
    let first_system = &provider.seen.lock().unwrap()[0][0];
    assert!(first_system.content.contains("Tester"));
}
