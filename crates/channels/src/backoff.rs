use std::time::Duration;

use chatrelay_config::SupervisorConfig;

/// Exponential retry delays: `base * 2^(n-1)` for the n-th consecutive
/// failure, capped at `max`, until `max_attempts` failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts,
            failures: 0,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_delay_secs),
            Duration::from_secs(config.max_delay_secs),
            config.max_attempts,
        )
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once `max_attempts` consecutive failures have accumulated.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.max_attempts != 0 && self.failures >= self.max_attempts {
            return None;
        }
        let exp = self.failures.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exp);
        Some(delay.min(self.max))
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
