//! Retry budget and exponential backoff for provider attempts.
//!
//! The failover loop gives the primary provider several attempts and every
//! other candidate one; between attempts against the same provider it sleeps
//! `min(base * 2^attempt + jitter, max)`.

use std::time::Duration;

use crate::config::RetryConfig;

/// Attempt budget and backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts against the primary provider. Default: 3.
    pub primary_attempts: u32,
    /// Attempts against each non-primary candidate. Default: 1.
    pub fallback_attempts: u32,
    /// Base delay in milliseconds for exponential backoff. Default: 1000.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds. Default: 30000.
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Attempts allowed for the candidate at `position` in the attempt list.
    pub fn attempts_for(&self, position: usize) -> u32 {
        let attempts = if position == 0 {
            self.primary_attempts
        } else {
            self.fallback_attempts
        };
        attempts.max(1)
    }

    /// No sleeping between attempts. Used by tests and the CLI dry run.
    pub fn immediate(primary_attempts: u32, fallback_attempts: u32) -> Self {
        Self {
            primary_attempts,
            fallback_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            primary_attempts: cfg.primary_attempts,
            fallback_attempts: cfg.fallback_attempts,
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
        }
    }
}

/// Compute the backoff delay for a given attempt (without sleeping).
///
/// # Arguments
/// * `attempt` - The current retry attempt (0-indexed)
/// * `base_delay_ms` - Base delay in milliseconds
/// * `max_delay_ms` - Maximum delay cap in milliseconds
/// * `jitter_ms` - Jitter value to add
///
/// # Example
/// ```
/// use clawcore::providers::retry::compute_delay;
///
/// assert_eq!(compute_delay(0, 1000, 30_000, 0), 1000);
/// assert_eq!(compute_delay(2, 1000, 30_000, 0), 4000);
/// assert_eq!(compute_delay(10, 1000, 30_000, 0), 30_000);
/// ```
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

/// Sleep for the backoff delay of `attempt`.
///
/// Jitter comes from the nanosecond component of the system clock, which is
/// enough to decorrelate concurrent retries without pulling in `rand`.
pub async fn delay_with_jitter(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) {
    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % base_delay_ms.max(1))
        .unwrap_or(0);

    let delay = compute_delay(attempt, base_delay_ms, max_delay_ms, jitter_ms);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
