//! Provider registry with role-based selection, tiered escalation and failover.
//!
//! The manager owns every registered backend together with its health state.
//! Callers ask for a provider by role (`chat`, `tools`, `cli_parent`) and an
//! optional capability tier; calls go through an ordered attempt list:
//!
//! 1. the primary provider (up to `primary_attempts` tries),
//! 2. providers of the same role at a higher tier, lowest tier first,
//! 3. the configured fallback chain,
//!
//! skipping providers that are cooling down or cannot call tools when the
//! request offers tools. Every failure is classified and opens the failing
//! provider for a reason-specific cooldown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ProvidersConfig, RoleDefaultsConfig};
use crate::error::{ClawError, ProviderError, Result};
use crate::session::Message;

use super::cooldown::{CooldownPolicy, CooldownTracker, FailoverReason, ProviderHealth};
use super::error_classifier::classify_error;
use super::retry::{delay_with_jitter, RetryPolicy};
use super::tool_repair::{
    build_repair_messages, looks_like_tool_call, parse_tool_calls_from_text, strip_tool_markup,
};
use super::{ChatOptions, LLMProvider, LLMResponse, ToolDefinition};

const LIFECYCLE_NEW: u8 = 0;
const LIFECYCLE_READY: u8 = 1;
const LIFECYCLE_SHUTDOWN: u8 = 2;

/// What a provider may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    /// Plain conversation and answer finalization
    Chat,
    /// Tool-calling iterations
    Tools,
    /// Parent process driving a CLI sub-agent
    CliParent,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderRole::Chat => write!(f, "chat"),
            ProviderRole::Tools => write!(f, "tools"),
            ProviderRole::CliParent => write!(f, "cli_parent"),
        }
    }
}

/// Capability tier. Ordered: `Fast < Standard < Advanced`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    Fast,
    #[default]
    Standard,
    Advanced,
}

/// Static description of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: String,
    /// Model sent to the backend. Empty means the backend's default.
    pub model: String,
    pub roles: Vec<ProviderRole>,
    pub supports_tools: bool,
    pub tier: ProviderTier,
}

impl ProviderProfile {
    /// A standard-tier profile serving chat and tools.
    pub fn new(id: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            roles: vec![ProviderRole::Chat, ProviderRole::Tools],
            supports_tools: true,
            tier: ProviderTier::Standard,
        }
    }

    pub fn with_roles(mut self, roles: &[ProviderRole]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_tool_support(mut self, supports_tools: bool) -> Self {
        self.supports_tools = supports_tools;
        self
    }

    pub fn has_role(&self, role: ProviderRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Filters applied when choosing providers.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Minimum tier; providers below it are not eligible
    pub tier: Option<ProviderTier>,
    /// Only providers that support tool calling
    pub require_tools: bool,
    /// Role used for tier escalation candidates
    pub role: Option<ProviderRole>,
    /// Provider ids to leave out
    pub exclude: Vec<String>,
}

impl SelectOptions {
    pub fn for_role(role: ProviderRole) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn with_tier(mut self, tier: Option<ProviderTier>) -> Self {
        self.tier = tier;
        self
    }

    pub fn requiring_tools(mut self, require_tools: bool) -> Self {
        self.require_tools = require_tools;
        self
    }

    pub fn excluding(mut self, id: &str) -> Self {
        self.exclude.push(id.to_string());
        self
    }
}

/// A chosen provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSelection {
    pub id: String,
    pub model: String,
    pub tier: ProviderTier,
}

/// One logical provider call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: ChatOptions,
    pub role: ProviderRole,
    pub tier: Option<ProviderTier>,
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>, role: ProviderRole) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            options: ChatOptions::default(),
            role,
            tier: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tier(mut self, tier: Option<ProviderTier>) -> Self {
        self.tier = tier;
        self
    }
}

/// A successful call and where it landed.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub response: LLMResponse,
    pub provider_id: String,
    pub model: String,
    /// Attempts spent across all candidates, including the successful one
    pub attempts: u32,
    /// Tool calls were recovered from text or a repair request
    pub repaired: bool,
}

/// Health transitions broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Failed {
        provider_id: String,
        reason: FailoverReason,
        cooldown: Duration,
    },
    Recovered {
        provider_id: String,
    },
}

struct ProviderSlot {
    profile: ProviderProfile,
    provider: Arc<dyn LLMProvider>,
}

/// Registered providers, their health, and the failover policy.
pub struct ProviderManager {
    slots: RwLock<Vec<ProviderSlot>>,
    defaults: RoleDefaultsConfig,
    fallback_chain: Vec<String>,
    cooldown: CooldownTracker,
    retry: RetryPolicy,
    call_timeout: Duration,
    lifecycle: AtomicU8,
    events: broadcast::Sender<ProviderEvent>,
}

impl ProviderManager {
    /// An empty manager with default retry, cooldown and timeout settings.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            slots: RwLock::new(Vec::new()),
            defaults: RoleDefaultsConfig::default(),
            fallback_chain: Vec::new(),
            cooldown: CooldownTracker::default(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(90),
            lifecycle: AtomicU8::new(LIFECYCLE_NEW),
            events,
        }
    }

    /// Failover policy from config. Providers still have to be registered.
    pub fn from_config(cfg: &ProvidersConfig) -> Self {
        Self::new()
            .with_role_defaults(cfg.defaults.clone())
            .with_fallback_chain(cfg.fallback_chain.clone())
            .with_retry_policy(RetryPolicy::from(&cfg.retry))
            .with_cooldown_policy(CooldownPolicy::from(&cfg.cooldown))
            .with_call_timeout(Duration::from_secs(cfg.call_timeout_secs))
    }

    pub fn with_role_defaults(mut self, defaults: RoleDefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_fallback_chain(mut self, chain: Vec<String>) -> Self {
        self.fallback_chain = chain;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cooldown_policy(mut self, policy: CooldownPolicy) -> Self {
        self.cooldown = CooldownTracker::new(policy);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn slots(&self) -> RwLockReadGuard<'_, Vec<ProviderSlot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.lifecycle.load(Ordering::Acquire) {
            LIFECYCLE_READY => Ok(()),
            LIFECYCLE_NEW => Err(ClawError::Config(
                "provider manager used before initialize()".into(),
            )),
            _ => Err(ClawError::Config(
                "provider manager used after shutdown()".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a backend under `profile.id`.
    pub fn register(&self, profile: ProviderProfile, provider: Arc<dyn LLMProvider>) -> Result<()> {
        if self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
            return Err(ClawError::Config(
                "cannot register providers after shutdown()".into(),
            ));
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        if slots.iter().any(|s| s.profile.id == profile.id) {
            return Err(ClawError::Config(format!(
                "provider '{}' is already registered",
                profile.id
            )));
        }
        debug!(
            provider = %profile.id,
            backend = provider.name(),
            tier = ?profile.tier,
            "Registered provider"
        );
        slots.push(ProviderSlot { profile, provider });
        Ok(())
    }

    /// Mark the manager ready. Warns about role defaults and fallback
    /// entries that name unregistered providers.
    pub fn initialize(&self) -> Result<()> {
        if self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_SHUTDOWN {
            return Err(ClawError::Config(
                "provider manager cannot be re-initialized after shutdown()".into(),
            ));
        }
        let slots = self.slots();
        let known: HashSet<&str> = slots.iter().map(|s| s.profile.id.as_str()).collect();
        for role in [ProviderRole::Chat, ProviderRole::Tools, ProviderRole::CliParent] {
            if let Some(id) = self.defaults.for_role(role) {
                if !known.contains(id) {
                    warn!(role = %role, provider = id, "Role default names an unregistered provider");
                }
            }
        }
        for id in &self.fallback_chain {
            if !known.contains(id.as_str()) {
                warn!(provider = %id, "Fallback chain names an unregistered provider");
            }
        }
        info!(providers = slots.len(), "Provider manager initialized");
        drop(slots);
        self.lifecycle.store(LIFECYCLE_READY, Ordering::Release);
        Ok(())
    }

    /// Stop accepting calls.
    pub fn shutdown(&self) {
        if self.lifecycle.swap(LIFECYCLE_SHUTDOWN, Ordering::AcqRel) != LIFECYCLE_SHUTDOWN {
            info!("Provider manager shut down");
        }
    }

    /// Subscribe to health transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Registered profiles in registration order.
    pub fn profiles(&self) -> Vec<ProviderProfile> {
        self.slots().iter().map(|s| s.profile.clone()).collect()
    }

    /// Health snapshot for one provider.
    pub fn health(&self, id: &str) -> ProviderHealth {
        self.cooldown.health(id)
    }

    /// Whether `id` is currently skipped.
    pub fn is_in_cooldown(&self, id: &str) -> bool {
        self.cooldown.is_in_cooldown(id)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn eligible(&self, profile: &ProviderProfile, opts: &SelectOptions) -> bool {
        if opts.require_tools && !profile.supports_tools {
            return false;
        }
        if opts.tier.is_some_and(|min| profile.tier < min) {
            return false;
        }
        if opts.exclude.iter().any(|id| id == &profile.id) {
            return false;
        }
        !self.cooldown.is_in_cooldown(&profile.id)
    }

    fn selection(profile: &ProviderProfile, provider: &dyn LLMProvider) -> ProviderSelection {
        let model = if profile.model.is_empty() {
            provider.default_model().to_string()
        } else {
            profile.model.clone()
        };
        ProviderSelection {
            id: profile.id.clone(),
            model,
            tier: profile.tier,
        }
    }

    /// Pick the provider for `role`.
    ///
    /// The configured default for the role wins when it is eligible.
    /// Otherwise the healthiest eligible provider with that role is chosen:
    /// closest tier first, then lowest failure ratio, then registration order.
    pub fn select_best_provider(
        &self,
        role: ProviderRole,
        opts: &SelectOptions,
    ) -> Result<ProviderSelection> {
        self.ensure_ready()?;
        let slots = self.slots();

        if let Some(default_id) = self.defaults.for_role(role) {
            if let Some(slot) = slots.iter().find(|s| s.profile.id == default_id) {
                if self.eligible(&slot.profile, opts) {
                    return Ok(Self::selection(&slot.profile, slot.provider.as_ref()));
                }
                debug!(role = %role, provider = default_id, "Role default not eligible, selecting by health");
            }
        }

        let base_tier = opts.tier.unwrap_or(ProviderTier::Fast);
        slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.profile.has_role(role) && self.eligible(&s.profile, opts))
            .min_by(|(ia, a), (ib, b)| {
                let da = a.profile.tier as u8 - base_tier as u8;
                let db = b.profile.tier as u8 - base_tier as u8;
                let ra = self.cooldown.health(&a.profile.id).failure_ratio();
                let rb = self.cooldown.health(&b.profile.id).failure_ratio();
                da.cmp(&db)
                    .then(ra.total_cmp(&rb))
                    .then(ia.cmp(ib))
            })
            .map(|(_, s)| Self::selection(&s.profile, s.provider.as_ref()))
            .ok_or_else(|| {
                ClawError::NoProviderAvailable(format!(
                    "no eligible provider for role '{}'{}",
                    role,
                    if opts.require_tools {
                        " with tool support"
                    } else {
                        ""
                    }
                ))
            })
    }

    /// Ordered attempt list: primary, tier escalation, fallback chain.
    ///
    /// Ids are deduplicated. Unknown ids, cooling-down providers and (when
    /// `opts.require_tools`) tool-incapable providers are left out.
    pub fn get_prioritized_provider_ids(&self, primary: &str, opts: &SelectOptions) -> Vec<String> {
        let slots = self.slots();
        let find = |id: &str| slots.iter().find(|s| s.profile.id == id);

        let mut ordered: Vec<&str> = vec![primary];

        let base_tier = opts
            .tier
            .or_else(|| find(primary).map(|s| s.profile.tier))
            .unwrap_or(ProviderTier::Fast);
        let mut escalation: Vec<(usize, &ProviderSlot)> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.profile.tier > base_tier)
            .filter(|(_, s)| opts.role.map_or(true, |r| s.profile.has_role(r)))
            .collect();
        escalation.sort_by(|(ia, a), (ib, b)| a.profile.tier.cmp(&b.profile.tier).then(ia.cmp(ib)));
        ordered.extend(escalation.iter().map(|(_, s)| s.profile.id.as_str()));

        ordered.extend(self.fallback_chain.iter().map(String::as_str));

        let mut seen = HashSet::new();
        ordered
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter(|id| match find(id) {
                Some(slot) => {
                    // Tier is a floor for selection, not for the fallback path.
                    let relaxed = SelectOptions {
                        tier: None,
                        ..opts.clone()
                    };
                    self.eligible(&slot.profile, &relaxed)
                }
                None => false,
            })
            .map(str::to_string)
            .collect()
    }

    fn handle(&self, id: &str) -> Option<(Arc<dyn LLMProvider>, String)> {
        let slots = self.slots();
        let slot = slots.iter().find(|s| s.profile.id == id)?;
        let selection = Self::selection(&slot.profile, slot.provider.as_ref());
        Some((Arc::clone(&slot.provider), selection.model))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn record_success(&self, id: &str) {
        if self.cooldown.mark_success(id) {
            info!(provider = id, "Provider recovered");
            let _ = self.events.send(ProviderEvent::Recovered {
                provider_id: id.to_string(),
            });
        }
    }

    fn record_failure(&self, id: &str, err: &ProviderError) {
        let reason = FailoverReason::from_provider_error(err);
        let cooldown = self.cooldown.mark_failure(id, reason);
        warn!(
            provider = id,
            reason = %reason,
            cooldown_ms = cooldown.as_millis() as u64,
            "Provider entered cooldown"
        );
        let _ = self.events.send(ProviderEvent::Failed {
            provider_id: id.to_string(),
            reason,
            cooldown,
        });
    }

    /// Call providers in priority order until one succeeds.
    ///
    /// The primary gets `primary_attempts` tries with backoff between them,
    /// every other candidate `fallback_attempts`. Auth, billing and format
    /// failures abandon the current candidate at once. When every candidate
    /// fails, the last classified error is returned.
    pub async fn call_provider_with_fallback(
        &self,
        request: ProviderRequest,
        primary: &str,
    ) -> Result<ProviderReply> {
        self.ensure_ready()?;

        let opts = SelectOptions {
            tier: request.tier,
            require_tools: !request.tools.is_empty(),
            role: Some(request.role),
            exclude: Vec::new(),
        };
        let ids = self.get_prioritized_provider_ids(primary, &opts);
        if ids.is_empty() {
            return Err(ClawError::NoProviderAvailable(format!(
                "every candidate for role '{}' (primary '{}') is unavailable",
                request.role, primary
            )));
        }
        debug!(candidates = ?ids, "Provider attempt order");

        let mut last_error: Option<ProviderError> = None;
        let mut total_attempts = 0u32;

        for (position, id) in ids.iter().enumerate() {
            let Some((provider, model)) = self.handle(id) else {
                continue;
            };
            let max_attempts = self.retry.attempts_for(position);
            let mut failure: Option<ProviderError> = None;

            for attempt in 0..max_attempts {
                if attempt > 0 {
                    delay_with_jitter(
                        attempt - 1,
                        self.retry.base_delay_ms,
                        self.retry.max_delay_ms,
                    )
                    .await;
                }
                total_attempts += 1;

                let call = provider.chat(
                    request.messages.clone(),
                    request.tools.clone(),
                    Some(&model),
                    request.options.clone(),
                );
                let err = match tokio::time::timeout(self.call_timeout, call).await {
                    Ok(Ok(response)) => {
                        self.record_success(id);
                        if position > 0 {
                            info!(provider = %id, primary, "Served by fallback provider");
                        }
                        return Ok(ProviderReply {
                            response,
                            provider_id: id.clone(),
                            model,
                            attempts: total_attempts,
                            repaired: false,
                        });
                    }
                    Ok(Err(e)) => classify_error(e),
                    Err(_) => ProviderError::Timeout(format!(
                        "no response within {}ms",
                        self.call_timeout.as_millis()
                    )),
                };

                warn!(
                    provider = %id,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    "Provider attempt failed"
                );
                let skip = err.skips_local_retry();
                failure = Some(err);
                if skip {
                    break;
                }
            }

            if let Some(err) = failure {
                self.record_failure(id, &err);
                last_error = Some(err);
            }
        }

        Err(match last_error {
            Some(err) => ClawError::ProviderTyped(err),
            None => ClawError::NoProviderAvailable(format!(
                "no registered provider among {:?}",
                ids
            )),
        })
    }

    /// [`call_provider_with_fallback`](Self::call_provider_with_fallback)
    /// plus recovery of tool calls written as text.
    ///
    /// When tools were offered and the reply carries no structured calls,
    /// tool-call markup is parsed out of the text. If markup is present but
    /// unparseable, or the reply was truncated, exactly one repair request
    /// asking for a structured call is sent. A reply without any markup is a
    /// plain answer and passes through.
    pub async fn call_with_tool_repair(
        &self,
        request: ProviderRequest,
        primary: &str,
    ) -> Result<ProviderReply> {
        let offered = request.tools.clone();
        let base_messages = request.messages.clone();
        let base_options = request.options.clone();
        let role = request.role;
        let tier = request.tier;

        let mut reply = self.call_provider_with_fallback(request, primary).await?;
        if offered.is_empty() || reply.response.has_tool_calls() {
            return Ok(reply);
        }

        let recovered = parse_tool_calls_from_text(&reply.response.content, &offered);
        if !recovered.is_empty() {
            reply.response.content = strip_tool_markup(&reply.response.content);
            reply.response.tool_calls = recovered;
            reply.repaired = true;
            return Ok(reply);
        }

        let truncated = reply.response.is_truncated();
        if !truncated && !looks_like_tool_call(&reply.response.content) {
            return Ok(reply);
        }

        warn!(
            provider = %reply.provider_id,
            truncated,
            "Malformed tool call, sending one repair request"
        );
        let repair = ProviderRequest {
            messages: build_repair_messages(&base_messages, &reply.response),
            tools: offered.clone(),
            options: base_options.requiring_tool_call(),
            role,
            tier,
        };
        let mut repaired = self
            .call_provider_with_fallback(repair, &reply.provider_id)
            .await?;
        repaired.attempts += reply.attempts;

        if !repaired.response.has_tool_calls() {
            let recovered = parse_tool_calls_from_text(&repaired.response.content, &offered);
            if recovered.is_empty() {
                return Err(ClawError::ToolCallParse(format!(
                    "provider '{}' did not produce a valid tool call after one repair attempt",
                    repaired.provider_id
                )));
            }
            repaired.response.content = strip_tool_markup(&repaired.response.content);
            repaired.response.tool_calls = recovered;
        }
        repaired.repaired = true;
        Ok(repaired)
    }
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}
