//! Exponential poll delay.

use std::time::Duration;

/// Delay that doubles on every failed poll, clamped to a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Start at `min`. A `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    /// Back to `min` for a new wait cycle.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Delay to sleep before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the current delay and double it for the following poll.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}
