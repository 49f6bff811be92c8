//! Exponential backoff between retryable refresh failures.

use std::time::Duration;

/// Configuration parameters for exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Base backoff time in seconds.
    pub base_seconds: f64,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Exponential factor applied on error count increments.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 1.0,
            max_backoff: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

/// Consecutive failures of one retry loop.
#[derive(Debug)]
pub struct BackoffState {
    config: BackoffConfig,
    error_count: usize,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            error_count: 0,
        }
    }

    /// Registers a failure and returns the delay before the next attempt.
    pub fn register_error(&mut self) -> Duration {
        self.error_count = self.error_count.saturating_add(1);
        let exponent = self.error_count.saturating_sub(1).min(100) as i32;
        let backoff_secs = self.config.base_seconds * self.config.factor.powi(exponent);
        let capped = backoff_secs.min(self.config.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}
