//! Capped exponential reconnect delay

use std::time::Duration;

/// Reconnect schedule shared by every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min: Duration,
    pub max: Duration,
    pub factor: u32,
    /// Fixed streaming time that counts as a healthy connection. `None` means
    /// one backoff cycle: outlasting the delay that preceded the connection.
    pub healthy_after: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            factor: 2,
            healthy_after: None,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Per-session backoff state
///
/// Delays never decrease across consecutive failures and never exceed `max`.
/// A connection that streamed longer than the healthy threshold resets the
/// schedule to `min`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Option<Duration>,
    attempts: u64,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: None,
            attempts: 0,
        }
    }

    /// Delay before the next connect attempt
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.policy.min,
            Some(prev) => prev
                .saturating_mul(self.policy.factor.max(1))
                .clamp(self.policy.min, self.policy.max),
        };
        self.current = Some(next);
        self.attempts += 1;
        next
    }

    /// Report how long the last connection streamed
    ///
    /// Returns true when the schedule was reset.
    pub fn record_streaming(&mut self, streamed: Duration) -> bool {
        if streamed > self.healthy_threshold() {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Streaming time a connection must exceed to reset the schedule
    pub fn healthy_threshold(&self) -> Duration {
        self.policy
            .healthy_after
            .unwrap_or_else(|| self.current.unwrap_or(self.policy.min))
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}
