//! Reconnect backoff for the firehose subscription.

use std::time::Duration;

use tracing::debug;

/// Exponential reconnect delay with an optional attempt limit.
///
/// Delays start at `min`, double on each consecutive failure and are
/// capped at `max`. A `max_retries` of zero means retry forever.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    min: Duration,
    max: Duration,
    max_retries: u32,
    attempts: u32,
    current: Duration,
}

impl RetryBackoff {
    pub fn new(min: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            min,
            max,
            max_retries,
            attempts: 0,
            current: min,
        }
    }

    /// Delay before the next reconnect, or `None` once the limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }

        self.attempts += 1;
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }

    /// Forget previous failures after a healthy streaming period.
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            debug!(attempts = self.attempts, "reconnect backoff reset");
        }
        self.attempts = 0;
        self.current = self.min;
    }

    /// Consecutive reconnect attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.max_retries > 0 && self.attempts >= self.max_retries
    }
}
