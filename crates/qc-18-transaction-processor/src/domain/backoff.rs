//! Bounded exponential backoff for connect and registration attempts.

use serde::Deserialize;
use std::time::Duration;

/// Retry budget for establishing a validator session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Attempt budget, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before attempt `failed + 1`, given `failed` attempts so far.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Whether another attempt is allowed after `failed` failures.
    pub fn should_retry(&self, failed: u32) -> bool {
        failed < self.attempts()
    }
}
