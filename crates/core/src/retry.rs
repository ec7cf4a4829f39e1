//! Retry policy for failed task attempts.
//!
//! Attempt numbers are 1-indexed and counted *after* the failure is recorded:
//! the first failure is attempt 1.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of failed attempts after which the task is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Optional ceiling on any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: None,
        }
    }
}

/// What to do with a task after its `attempt`-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// `base * 2^(attempt - 1)`, saturating, capped at `max_delay` when set.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = 2u32
            .checked_pow(attempt - 1)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry {
                attempt,
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::GiveUp { attempts: attempt }
        }
    }
}
