//! Restart policy: capped exponential back-off with a hard attempt limit.

use std::time::Duration;

use lh_domain::config::SessionsConfig;

/// Controls how the lifecycle manager restarts a session after a
/// transient close.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first restart.
    pub base_delay: Duration,
    /// Maximum delay between attempts (cap).
    pub max_delay: Duration,
    /// Attempts allowed before the session is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &SessionsConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
            max_attempts: cfg.max_retry_attempts,
        }
    }

    /// Delay for the given attempt (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `attempt` is past the limit.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}
