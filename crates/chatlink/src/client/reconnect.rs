//! Reconnect scheduling after an abnormal close.

use std::time::Duration;

/// A reconnect the client should perform after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAttempt {
    /// 1-based number of this attempt.
    pub attempt: u32,
    pub delay: Duration,
}

impl ScheduledAttempt {
    /// Delay in whole milliseconds, saturating at `u64::MAX`.
    pub fn delay_ms(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Exponential backoff bounded by an attempt budget.
///
/// The n-th attempt (0-based) waits `base_interval * 2^n`. The budget is
/// restored as soon as a connection opens, so a connection that keeps
/// opening and dropping retries indefinitely at the base interval.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_interval: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_interval: Duration) -> Self {
        Self {
            max_attempts,
            base_interval,
            attempts: 0,
        }
    }

    /// Delay before the attempt with the given 0-based index.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
        self.base_interval.saturating_mul(factor)
    }

    /// Claim the next attempt, or `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<ScheduledAttempt> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        Some(ScheduledAttempt {
            attempt: self.attempts,
            delay,
        })
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
