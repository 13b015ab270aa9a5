//! Retry backoff policy and the clock it sleeps on.

use async_trait::async_trait;
use std::time::Duration;

use super::config::RetryConfig;

/// Decides how many attempts a transfer gets and how long to wait between
/// them.
pub trait BackoffPolicy: Send + Sync {
    /// Total attempts, including the first. Always at least 1.
    fn max_attempts(&self) -> u32;

    /// Delay after failed attempt number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// `initial * multiplier^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial,
            max,
            multiplier: multiplier.max(1.0),
        }
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.initial_delay_secs),
            Duration::from_secs(config.max_delay_secs),
            config.backoff_multiplier,
        )
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Something that can wait. Tests substitute a recording fake.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
