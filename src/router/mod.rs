//! Inbound message router.
//!
//! ```text
//! adapter ──event──> handle_inbound ──> session touch ──> channel queue
//!                                                            │ (priority, bounded)
//!                      send_to_session <── handler <── routes <── middleware
//! ```
//!
//! Every registered channel has its own bounded priority queue and
//! in-flight counter. Enqueueing never blocks: a full queue drops the
//! message and broadcasts [`RouterSignal::Dropped`]. Dispatch runs up to the
//! channel's concurrency limit as spawned tasks; each finished dispatch
//! pulls the next message. Router state sits behind a `std::sync::Mutex`
//! that is never held across an `.await`.

pub mod message;
pub mod middleware;
pub mod queue;
pub mod routes;
pub mod session;

pub use message::{InboundMessage, MessagePriority, OutboundMessage};
pub use middleware::{AllowlistMiddleware, EmptyContentFilter, Middleware, MiddlewareResult, Next};
pub use queue::{PriorityQueue, QueuedMessage};
pub use routes::{MessageHandler, Route, RouteTable};
pub use session::{SessionInfo, SessionTable};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::channels::{AdapterEvent, ChannelAdapter, SendReceipt};
use crate::config::RouterConfig;
use crate::error::{ClawError, Result};

/// Why a message never reached a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    QueueFull,
    Stopping,
    UnknownChannel,
    NoHandler,
    Unregistered,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::QueueFull => "queue_full",
            Self::Stopping => "stopping",
            Self::UnknownChannel => "unknown_channel",
            Self::NoHandler => "no_handler",
            Self::Unregistered => "unregistered",
        };
        f.write_str(s)
    }
}

/// Router activity broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterSignal {
    Dropped {
        channel: String,
        session_key: String,
        reason: DropReason,
    },
    Filtered {
        channel: String,
        session_key: String,
    },
    Handled {
        channel: String,
        session_key: String,
        route: String,
    },
    Requeued {
        channel: String,
        session_key: String,
        attempts: u32,
    },
    Failed {
        channel: String,
        session_key: String,
        attempts: u32,
        error: String,
    },
    SessionPruned {
        session_key: String,
    },
}

/// Queue settings for one registered adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    pub capacity: usize,
    pub max_concurrency: usize,
}

impl AdapterOptions {
    /// Router defaults with any per-channel override applied.
    pub fn from_config(config: &RouterConfig, channel: &str) -> Self {
        let overrides = config.channels.get(channel);
        Self {
            capacity: overrides
                .and_then(|o| o.capacity)
                .unwrap_or(config.queue_capacity)
                .max(1),
            max_concurrency: overrides
                .and_then(|o| o.max_concurrency)
                .unwrap_or(config.max_concurrency)
                .max(1),
        }
    }
}

struct ChannelState {
    adapter: Arc<dyn ChannelAdapter>,
    queue: PriorityQueue,
    in_flight: usize,
    max_concurrency: usize,
    connected: bool,
}

#[derive(Default)]
struct RouterState {
    channels: HashMap<String, ChannelState>,
    sessions: SessionTable,
    stopping: bool,
}

impl RouterState {
    fn is_drained(&self) -> bool {
        self.channels
            .values()
            .all(|c| c.queue.is_empty() && c.in_flight == 0)
    }
}

/// Per-channel queues, middleware, routes and session bookkeeping.
pub struct MessageRouter {
    config: RouterConfig,
    state: Mutex<RouterState>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    routes: RwLock<RouteTable>,
    signals: broadcast::Sender<RouterSignal>,
    idle: Notify,
    pruner: Mutex<Option<JoinHandle<()>>>,
    this: Weak<MessageRouter>,
}

impl MessageRouter {
    /// Build a router with the built-in middleware: the sender allowlist
    /// from `config.allow_from`, then the empty-content filter.
    pub fn new(config: RouterConfig) -> Arc<Self> {
        let builtins: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(AllowlistMiddleware::new(&config.allow_from)),
            Arc::new(EmptyContentFilter),
        ];
        let (signals, _) = broadcast::channel(256);
        Arc::new_cyclic(|this| Self {
            config,
            state: Mutex::new(RouterState::default()),
            middleware: RwLock::new(builtins),
            routes: RwLock::new(RouteTable::new()),
            signals,
            idle: Notify::new(),
            pruner: Mutex::new(None),
            this: this.clone(),
        })
    }

    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, signal: RouterSignal) {
        let _ = self.signals.send(signal);
    }

    fn dropped(&self, msg: &InboundMessage, reason: DropReason) {
        warn!(
            channel = %msg.channel,
            session_key = %msg.session_key,
            reason = %reason,
            "Message dropped"
        );
        self.signal(RouterSignal::Dropped {
            channel: msg.channel.clone(),
            session_key: msg.session_key.clone(),
            reason,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterSignal> {
        self.signals.subscribe()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Adapters
    // ------------------------------------------------------------------

    /// Register an adapter under its name. `None` takes the options from
    /// the router configuration.
    pub fn register_adapter(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        options: Option<AdapterOptions>,
    ) -> Result<()> {
        let name = adapter.name().to_string();
        let options = options.unwrap_or_else(|| AdapterOptions::from_config(&self.config, &name));
        let mut state = self.state();
        if state.channels.contains_key(&name) {
            return Err(ClawError::Channel(format!(
                "adapter '{}' is already registered",
                name
            )));
        }
        state.channels.insert(
            name.clone(),
            ChannelState {
                adapter,
                queue: PriorityQueue::new(options.capacity.max(1)),
                in_flight: 0,
                max_concurrency: options.max_concurrency.max(1),
                connected: false,
            },
        );
        info!(
            channel = %name,
            capacity = options.capacity,
            max_concurrency = options.max_concurrency,
            "Adapter registered"
        );
        Ok(())
    }

    /// Remove an adapter. Messages still queued for it are dropped;
    /// dispatches already running finish normally.
    pub fn unregister_adapter(&self, channel: &str) -> Option<Arc<dyn ChannelAdapter>> {
        let (adapter, pending) = {
            let mut state = self.state();
            let mut removed = state.channels.remove(channel)?;
            (removed.adapter, removed.queue.drain())
        };
        for queued in &pending {
            self.dropped(&queued.message, DropReason::Unregistered);
        }
        self.idle.notify_waiters();
        info!(channel, dropped = pending.len(), "Adapter unregistered");
        Some(adapter)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_connected(&self, channel: &str) -> bool {
        self.state()
            .channels
            .get(channel)
            .is_some_and(|c| c.connected)
    }

    // ------------------------------------------------------------------
    // Middleware and routes
    // ------------------------------------------------------------------

    /// Append a middleware after the ones already installed.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn add_route(&self, route: Route) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(route);
    }

    pub fn remove_route(&self, name: &str) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn set_default_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_default(handler);
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Accept a message from an adapter. Never waits for queue space.
    ///
    /// Fails when the router is stopping, the channel is not registered, or
    /// the channel queue is full; each of these also broadcasts
    /// [`RouterSignal::Dropped`].
    pub fn handle_inbound(&self, msg: InboundMessage) -> Result<()> {
        let channel = msg.channel.clone();
        let rejected = {
            let mut state = self.state();
            if state.stopping {
                Some((msg, DropReason::Stopping))
            } else if !state.channels.contains_key(&channel) {
                Some((msg, DropReason::UnknownChannel))
            } else {
                state.sessions.touch(&msg);
                let queue = match state.channels.get_mut(&channel) {
                    Some(ch) => &mut ch.queue,
                    None => return Err(ClawError::Channel(format!("unknown channel '{}'", channel))),
                };
                match queue.push(msg) {
                    Ok(()) => None,
                    Err(msg) => Some((msg, DropReason::QueueFull)),
                }
            }
        };

        if let Some((msg, reason)) = rejected {
            self.dropped(&msg, reason);
            return Err(match reason {
                DropReason::UnknownChannel => {
                    ClawError::Channel(format!("unknown channel '{}'", channel))
                }
                DropReason::Stopping => ClawError::Router("router is stopping".into()),
                _ => ClawError::Router(format!("queue for channel '{}' is full", channel)),
            });
        }

        debug!(channel = %channel, "Message enqueued");
        self.dispatch(&channel);
        Ok(())
    }

    /// React to one adapter event.
    pub fn handle_adapter_event(&self, channel: &str, event: AdapterEvent) {
        match event {
            AdapterEvent::Message(msg) => {
                if let Err(e) = self.handle_inbound(msg) {
                    debug!(channel, error = %e, "Inbound message rejected");
                }
            }
            AdapterEvent::Connected => {
                if let Some(ch) = self.state().channels.get_mut(channel) {
                    ch.connected = true;
                }
                info!(channel, "Adapter connected");
            }
            AdapterEvent::Disconnected { reason } => {
                if let Some(ch) = self.state().channels.get_mut(channel) {
                    ch.connected = false;
                }
                warn!(channel, reason = reason.as_deref().unwrap_or("-"), "Adapter disconnected");
            }
            AdapterEvent::Error(err) => {
                error!(channel, error = %err, "Adapter error");
            }
        }
    }

    /// Forward events from `events` until the sender closes or the router
    /// is dropped.
    pub fn attach_adapter(
        &self,
        channel: &str,
        mut events: mpsc::Receiver<AdapterEvent>,
    ) -> JoinHandle<()> {
        let router = self.this.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(router) = router.upgrade() else {
                    break;
                };
                router.handle_adapter_event(&channel, event);
            }
            debug!(channel = %channel, "Adapter event stream closed");
        })
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Start as many dispatches for `channel` as its concurrency allows.
    fn dispatch(&self, channel: &str) {
        let Some(router) = self.this.upgrade() else {
            return;
        };
        loop {
            let queued = {
                let mut state = self.state();
                let Some(ch) = state.channels.get_mut(channel) else {
                    return;
                };
                if ch.in_flight >= ch.max_concurrency {
                    return;
                }
                let Some(queued) = ch.queue.pop() else {
                    return;
                };
                ch.in_flight += 1;
                queued
            };

            let router = Arc::clone(&router);
            let channel = channel.to_string();
            let span = info_span!(
                "dispatch",
                channel = %channel,
                session_key = %queued.message.session_key,
            );
            tokio::spawn(
                async move {
                    router.process(queued).await;
                    router.finish(&channel);
                }
                .instrument(span),
            );
        }
    }

    fn finish(&self, channel: &str) {
        if let Some(ch) = self.state().channels.get_mut(channel) {
            ch.in_flight = ch.in_flight.saturating_sub(1);
        }
        self.dispatch(channel);
        self.idle.notify_waiters();
    }

    async fn process(&self, mut queued: QueuedMessage) {
        queued.attempts += 1;
        let channel = queued.message.channel.clone();
        let session_key = queued.message.session_key.clone();
        debug!(
            priority = %queued.message.priority,
            waited_ms = queued.enqueued_at.elapsed().as_millis() as u64,
            attempt = queued.attempts,
            "Dispatching"
        );

        let chain = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let msg = match Next::new(&chain).run(queued.message.clone()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                self.signal(RouterSignal::Filtered {
                    channel,
                    session_key,
                });
                return;
            }
            Err(e) => {
                warn!(error = %e, "Middleware failed");
                self.signal(RouterSignal::Failed {
                    channel,
                    session_key,
                    attempts: queued.attempts,
                    error: e.to_string(),
                });
                return;
            }
        };

        let resolved = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&msg);
        let Some((route, handler)) = resolved else {
            self.dropped(&msg, DropReason::NoHandler);
            return;
        };

        let outcome = AssertUnwindSafe(handler.handle(msg))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ClawError::Router("handler panicked".into())));

        match outcome {
            Ok(reply) => {
                if let Some(text) = reply {
                    if let Err(e) = self.send_to_session(&session_key, &text).await {
                        warn!(error = %e, "Failed to deliver reply");
                    }
                }
                debug!(route = %route, "Message handled");
                self.signal(RouterSignal::Handled {
                    channel,
                    session_key,
                    route,
                });
            }
            Err(e) if queued.attempts < self.config.max_dispatch_attempts => {
                warn!(error = %e, attempts = queued.attempts, "Handler failed, requeueing");
                let attempts = queued.attempts;
                let requeued = match self.state().channels.get_mut(&channel) {
                    Some(ch) => ch.queue.requeue(queued).is_ok(),
                    None => false,
                };
                if requeued {
                    self.signal(RouterSignal::Requeued {
                        channel,
                        session_key,
                        attempts,
                    });
                } else {
                    self.signal(RouterSignal::Failed {
                        channel,
                        session_key,
                        attempts,
                        error: e.to_string(),
                    });
                }
            }
            Err(e) => {
                error!(error = %e, attempts = queued.attempts, "Handler failed");
                self.signal(RouterSignal::Failed {
                    channel,
                    session_key,
                    attempts: queued.attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Send `text` to the chat (and thread) behind `session_key`.
    pub async fn send_to_session(&self, session_key: &str, text: &str) -> Result<SendReceipt> {
        let (adapter, outbound) = {
            let state = self.state();
            let session = state
                .sessions
                .get(session_key)
                .ok_or_else(|| ClawError::NotFound(format!("session '{}'", session_key)))?;
            let ch = state.channels.get(&session.channel).ok_or_else(|| {
                ClawError::Channel(format!("no adapter for channel '{}'", session.channel))
            })?;
            let outbound = OutboundMessage::new(&session.channel, &session.chat_id, text)
                .with_thread(session.thread_id.as_deref());
            (Arc::clone(&ch.adapter), outbound)
        };

        let channel = outbound.channel.clone();
        let receipt = adapter.send(outbound).await?;
        if !receipt.ok {
            warn!(
                channel = %channel,
                session_key,
                error = receipt.error.as_deref().unwrap_or("-"),
                "Adapter reported failed send"
            );
        }
        Ok(receipt)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn session(&self, session_key: &str) -> Option<SessionInfo> {
        self.state().sessions.get(session_key).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Forget sessions idle longer than the configured timeout.
    pub fn prune_idle_sessions(&self) -> usize {
        let idle = Duration::from_secs(self.config.session_idle_timeout_secs);
        self.prune_sessions_idle_for(idle)
    }

    /// Forget sessions idle longer than `idle`.
    pub fn prune_sessions_idle_for(&self, idle: Duration) -> usize {
        let pruned = self.state().sessions.prune_idle(idle);
        for key in &pruned {
            debug!(session_key = %key, "Session pruned");
            self.signal(RouterSignal::SessionPruned {
                session_key: key.clone(),
            });
        }
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned idle sessions");
            self.notify_pruned(&pruned);
        }
        pruned.len()
    }

    /// Let every handler drop its per-session state.
    fn notify_pruned(&self, keys: &[String]) {
        let handlers = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers();
        if handlers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to notify handlers of pruned sessions");
            return;
        };
        let keys = keys.to_vec();
        runtime.spawn(async move {
            for key in &keys {
                for handler in &handlers {
                    handler.session_pruned(key).await;
                }
            }
        });
    }

    /// Start the periodic prune sweep. The task holds only a weak reference
    /// and ends when the router is dropped or stopped.
    pub fn start_session_pruner(&self) {
        let interval = Duration::from_secs(self.config.prune_interval_secs.max(1));
        self.start_session_pruner_every(interval);
    }

    pub fn start_session_pruner_every(&self, interval: Duration) {
        let router = self.this.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                router.prune_idle_sessions();
            }
        });
        let previous = self
            .pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // ------------------------------------------------------------------
    // Introspection and shutdown
    // ------------------------------------------------------------------

    pub fn queue_len(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map_or(0, |c| c.queue.len())
    }

    pub fn in_flight(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map_or(0, |c| c.in_flight)
    }

    pub fn is_stopping(&self) -> bool {
        self.state().stopping
    }

    /// Stop accepting messages and wait for every queue to drain and every
    /// dispatch to finish. `None` waits for the configured drain timeout.
    /// Returns `true` when the drain completed in time.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(Duration::from_secs(self.config.drain_timeout_secs));
        self.state().stopping = true;
        if let Some(pruner) = self
            .pruner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pruner.abort();
        }
        info!(timeout_ms = timeout.as_millis() as u64, "Router stopping");

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state().is_drained() {
                info!("Router drained");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                let pending: usize = self
                    .state()
                    .channels
                    .values()
                    .map(|c| c.queue.len() + c.in_flight)
                    .sum();
                warn!(pending, "Router drain timed out");
                return false;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl ChannelAdapter for Recorder {
        fn name(&self) -> &str {
            "test"
        }

        async fn send(&self, msg: OutboundMessage) -> Result<SendReceipt> {
            self.sent.lock().unwrap().push(msg);
            Ok(SendReceipt::ok())
        }
    }

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, msg: InboundMessage) -> Result<Option<String>> {
            Ok(Some(format!("echo: {}", msg.content)))
        }
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, _msg: InboundMessage) -> Result<Option<String>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ClawError::Router("transient".into()));
            }
            Ok(None)
        }
    }

    fn msg(content: &str) -> InboundMessage {
        InboundMessage::new("test", "u", "chat", content)
    }

    #[tokio::test]
    async fn test_reply_delivered_to_session() {
        let router = MessageRouter::new(RouterConfig::default());
        let adapter = Arc::new(Recorder::default());
        router.register_adapter(adapter.clone(), None).unwrap();
        router.set_default_handler(Arc::new(Echo));

        router.handle_inbound(msg("hi").with_thread("t1")).unwrap();
        assert!(router.stop(Some(Duration::from_secs(2))).await);

        let sent = adapter.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "echo: hi");
        assert_eq!(sent[0].thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_unknown_channel_and_duplicate_adapter() {
        let router = MessageRouter::new(RouterConfig::default());
        let mut signals = router.subscribe();
        assert!(router.handle_inbound(msg("x")).is_err());
        assert!(matches!(
            signals.recv().await.unwrap(),
            RouterSignal::Dropped {
                reason: DropReason::UnknownChannel,
                ..
            }
        ));

        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        assert!(router
            .register_adapter(Arc::new(Recorder::default()), None)
            .is_err());
    }

    #[tokio::test]
    async fn test_no_handler_drops() {
        let router = MessageRouter::new(RouterConfig::default());
        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        let mut signals = router.subscribe();
        router.handle_inbound(msg("x")).unwrap();
        assert!(matches!(
            signals.recv().await.unwrap(),
            RouterSignal::Dropped {
                reason: DropReason::NoHandler,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_message_filtered() {
        let router = MessageRouter::new(RouterConfig::default());
        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        router.set_default_handler(Arc::new(Echo));
        let mut signals = router.subscribe();
        router.handle_inbound(msg("   ")).unwrap();
        assert!(matches!(
            signals.recv().await.unwrap(),
            RouterSignal::Filtered { .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_dispatch_requeued_when_allowed() {
        let config = RouterConfig {
            max_dispatch_attempts: 2,
            ..Default::default()
        };
        let router = MessageRouter::new(config);
        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        router.set_default_handler(handler.clone());
        let mut signals = router.subscribe();

        router.handle_inbound(msg("x")).unwrap();
        assert!(matches!(
            signals.recv().await.unwrap(),
            RouterSignal::Requeued { attempts: 1, .. }
        ));
        assert!(matches!(
            signals.recv().await.unwrap(),
            RouterSignal::Handled { .. }
        ));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_rejects_new_messages() {
        let router = MessageRouter::new(RouterConfig::default());
        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        assert!(router.stop(Some(Duration::from_millis(100))).await);
        assert!(router.is_stopping());
        assert!(router.handle_inbound(msg("late")).is_err());
    }

    #[tokio::test]
    async fn test_adapter_events() {
        let router = MessageRouter::new(RouterConfig::default());
        let adapter = Arc::new(Recorder::default());
        router.register_adapter(adapter.clone(), None).unwrap();
        router.set_default_handler(Arc::new(Echo));

        let (tx, rx) = mpsc::channel(8);
        let task = router.attach_adapter("test", rx);
        tx.send(AdapterEvent::Connected).await.unwrap();
        tx.send(AdapterEvent::Message(msg("via event"))).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(router.is_connected("test"));
        assert!(router.stop(Some(Duration::from_secs(2))).await);
        assert_eq!(adapter.sent.lock().unwrap()[0].content, "echo: via event");
    }

    #[test]
    fn test_adapter_options_from_config() {
        let mut config = RouterConfig::default();
        config.channels.insert(
            "slack".into(),
            crate::config::ChannelQueueConfig {
                capacity: Some(5),
                max_concurrency: None,
            },
        );
        let slack = AdapterOptions::from_config(&config, "slack");
        assert_eq!(slack.capacity, 5);
        assert_eq!(slack.max_concurrency, 1);
        assert_eq!(AdapterOptions::from_config(&config, "cli").capacity, 100);
    }

    struct PruneWatcher {
        pruned: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl MessageHandler for PruneWatcher {
        async fn handle(&self, _msg: InboundMessage) -> Result<Option<String>> {
            Ok(None)
        }

        async fn session_pruned(&self, session_key: &str) {
            let _ = self.pruned.send(session_key.to_string());
        }
    }

    #[tokio::test]
    async fn test_pruned_sessions_reach_handlers() {
        let router = MessageRouter::new(RouterConfig::default());
        router
            .register_adapter(Arc::new(Recorder::default()), None)
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.set_default_handler(Arc::new(PruneWatcher { pruned: tx }));

        router.handle_inbound(msg("hi")).unwrap();
        assert!(router.stop(Some(Duration::from_secs(2))).await);
        assert_eq!(router.prune_sessions_idle_for(Duration::ZERO), 1);

        let key = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, msg("hi").session_key);
    }
}
