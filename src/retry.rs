use crate::config::EelConfig;
use rand::Rng;
use std::cmp::min;
use std::time::Duration;

/// Exponential backoff with equal jitter, shared by `curl` retries and the HTTP publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(125),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EelConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay),
            max_delay: Duration::from_millis(config.max_delay.max(config.initial_delay)),
        }
    }

    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Upper bound of the delay before `attempt` (1-based retry count).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let scaled = self.initial_delay.saturating_mul(1u32 << shift);
        min(scaled, self.max_delay)
    }

    /// Delay before `attempt`, jittered between half and the full ceiling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        jitter_between(ceiling / 2, ceiling)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// HTTP statuses worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}
