use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential reconnect backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "crate::config::duration_ms")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "crate::config::duration_ms")]
    pub max_delay: Duration,
    /// Reconnect attempts before the transport gives up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(initial * multiplier^(attempt - 1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}
