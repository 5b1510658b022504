//! Per-provider health and cooldown tracking.
//!
//! Each provider is either `Closed` (usable) or `Open { until }` (skipped
//! until the deadline passes). A failure opens the provider for a duration
//! chosen by its [`FailoverReason`], doubling with consecutive failures. The
//! next success closes it again.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CooldownConfig;
use crate::error::ProviderError;

/// Why a provider failed. Determines cooldown length and retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    RateLimit,
    Overloaded,
    Timeout,
    Auth,
    Billing,
    Format,
    Unknown,
}

impl FailoverReason {
    /// Classify a `ProviderError` into a `FailoverReason`.
    pub fn from_provider_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::RateLimit(_) => Self::RateLimit,
            ProviderError::Overloaded(_) => Self::Overloaded,
            ProviderError::Timeout(_) => Self::Timeout,
            ProviderError::Auth(_) => Self::Auth,
            ProviderError::Billing(_) => Self::Billing,
            ProviderError::Format(_) | ProviderError::InvalidRequest(_) => Self::Format,
            ProviderError::ServerError(_)
            | ProviderError::ModelNotFound(_)
            | ProviderError::Unknown(_) => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::Billing => "billing",
            Self::Format => "format",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base cooldown per reason plus a global cap.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    pub rate_limit: Duration,
    pub billing: Duration,
    pub auth: Duration,
    pub format: Duration,
    pub overloaded: Duration,
    pub timeout: Duration,
    pub unknown: Duration,
    pub max: Duration,
}

impl CooldownPolicy {
    /// The same base duration for every reason. Handy for tests.
    pub fn uniform(base: Duration) -> Self {
        Self {
            rate_limit: base,
            billing: base,
            auth: base,
            format: base,
            overloaded: base,
            timeout: base,
            unknown: base,
            max: base.saturating_mul(64),
        }
    }

    fn base(&self, reason: FailoverReason) -> Duration {
        match reason {
            FailoverReason::RateLimit => self.rate_limit,
            FailoverReason::Billing => self.billing,
            FailoverReason::Auth => self.auth,
            FailoverReason::Format => self.format,
            FailoverReason::Overloaded => self.overloaded,
            FailoverReason::Timeout => self.timeout,
            FailoverReason::Unknown => self.unknown,
        }
    }

    /// Cooldown for the `consecutive`-th failure in a row (1-based).
    ///
    /// Auth and format failures keep a flat cooldown: retrying sooner
    /// would not help, and growing it would hide a fixed credential.
    pub fn duration_for(&self, reason: FailoverReason, consecutive: u32) -> Duration {
        let base = self.base(reason);
        let scaled = match reason {
            FailoverReason::Auth | FailoverReason::Format => base,
            _ => {
                let factor = 2u32.saturating_pow(consecutive.saturating_sub(1).min(16));
                base.saturating_mul(factor)
            }
        };
        scaled.min(self.max)
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::from(&CooldownConfig::default())
    }
}

impl From<&CooldownConfig> for CooldownPolicy {
    fn from(cfg: &CooldownConfig) -> Self {
        Self {
            rate_limit: Duration::from_secs(cfg.rate_limit_secs),
            billing: Duration::from_secs(cfg.billing_secs),
            auth: Duration::from_secs(cfg.auth_secs),
            format: Duration::from_secs(cfg.format_secs),
            overloaded: Duration::from_secs(cfg.overloaded_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
            unknown: Duration::from_secs(cfg.unknown_secs),
            max: Duration::from_secs(cfg.max_secs),
        }
    }
}

/// Circuit state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Closed,
    Open {
        until: Instant,
        reason: FailoverReason,
    },
}

/// Point-in-time view of a provider's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            state: HealthState::Closed,
            consecutive_failures: 0,
            successes: 0,
            failures: 0,
        }
    }

    /// True while the cooldown deadline lies in the future.
    pub fn is_cooling_down(&self) -> bool {
        match self.state {
            HealthState::Closed => false,
            HealthState::Open { until, .. } => Instant::now() < until,
        }
    }

    /// Failures over total calls; 0.0 for an unused provider.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }
}

/// Thread-safe per-provider cooldown tracker.
#[derive(Clone)]
pub struct CooldownTracker {
    policy: CooldownPolicy,
    entries: Arc<RwLock<HashMap<String, ProviderHealth>>>,
}

impl CooldownTracker {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderHealth>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProviderHealth>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` if the provider is currently in cooldown and should be skipped.
    pub fn is_in_cooldown(&self, provider: &str) -> bool {
        self.read()
            .get(provider)
            .map(ProviderHealth::is_cooling_down)
            .unwrap_or(false)
    }

    /// Record a failure and open the provider. Returns the cooldown applied.
    pub fn mark_failure(&self, provider: &str, reason: FailoverReason) -> Duration {
        let mut entries = self.write();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::new);
        entry.failures += 1;
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        let duration = self.policy.duration_for(reason, entry.consecutive_failures);
        entry.state = HealthState::Open {
            until: Instant::now() + duration,
            reason,
        };
        duration
    }

    /// Record a success. Returns `true` when this closed an open provider.
    pub fn mark_success(&self, provider: &str) -> bool {
        let mut entries = self.write();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(ProviderHealth::new);
        entry.successes += 1;
        entry.consecutive_failures = 0;
        let was_open = matches!(entry.state, HealthState::Open { .. });
        entry.state = HealthState::Closed;
        was_open
    }

    /// Snapshot of one provider's health. Unknown providers are healthy.
    pub fn health(&self, provider: &str) -> ProviderHealth {
        self.read()
            .get(provider)
            .copied()
            .unwrap_or_else(ProviderHealth::new)
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(CooldownPolicy::default())
    }
}
