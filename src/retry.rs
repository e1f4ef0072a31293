//! Reconnect backoff for the operation log tailer.

use crate::config::RetryConfig;
use std::time::Duration;

/// Bounded exponential backoff with an optional give-up threshold.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
    /// Backoff multiplier (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Consecutive attempts allowed (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Delay to wait before the given attempt (1-based). Attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let max_ms = self.max_backoff.as_millis() as f64;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !base_ms.is_finite() || base_ms >= max_ms {
            return self.max_backoff;
        }
        Duration::from_millis(base_ms.max(0.0).round() as u64)
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}
