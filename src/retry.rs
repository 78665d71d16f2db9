//! Retry policy: exponential backoff with jitter, bounded by a call deadline.

use rand::random;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClientOptions;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&ClientOptions::default())
    }
}

impl RetryPolicy {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            retries: options.retries,
            initial_delay: Duration::try_from_secs_f64(options.backoff_factor.max(0.0))
                .unwrap_or(options.max_backoff),
            max_delay: options.max_backoff,
            multiplier: 2.0,
            jitter: options.jitter.clamp(0.0, 1.0),
        }
    }

    /// Policy with no waiting between attempts
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay before retry number `attempt + 1` (0-based attempt just failed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base_ms * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(clamped.round() as u64)
    }

    /// Delay for `attempt`, or `None` when sleeping would reach the deadline
    pub fn delay_within(&self, attempt: u32, deadline: Instant) -> Option<Duration> {
        let delay = self.delay_for_attempt(attempt);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if delay >= remaining {
            None
        } else {
            Some(delay)
        }
    }
}
