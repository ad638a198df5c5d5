//! Retry policy for transient provider and index failures.
//!
//! The policy only computes delays; the app crate owns the sleeping.

use std::time::Duration;

use serde::Deserialize;

/// Upper bound on any single backoff delay.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    ///
    /// `base_delay_ms * backoff_multiplier^(failed_attempt - 1)`, capped at
    /// [`MAX_DELAY`].
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1) as i32;
        let ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        if !ms.is_finite() || ms >= MAX_DELAY.as_millis() as f64 {
            return MAX_DELAY;
        }
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `failed_attempt` failures.
    pub fn should_retry(&self, failed_attempt: u32) -> bool {
        failed_attempt < self.max_attempts
    }
}
