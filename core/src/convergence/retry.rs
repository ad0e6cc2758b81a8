//! Retry policies and per-resource backoff tracking.
//!
//! A `RetryPolicy` turns an attempt number into a delay using one of three
//! backoff strategies (fixed, linear, exponential), capped at
//! `max_delay_ms`. `RetryTracker` counts consecutive failures per resource
//! so the controller can back off a failing resource without slowing down
//! the others.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::config::BackoffStrategy;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(strategy: BackoffStrategy, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        RetryPolicy {
            strategy,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Compute the delay in milliseconds before the given attempt.
    ///
    /// Attempt 0 is the first retry (after the initial failure).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        };
        raw.min(self.max_delay_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }
}

impl Default for RetryPolicy {
    /// Default: exponential backoff from 1s, capped at 5 minutes.
    fn default() -> Self {
        RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 300_000,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryTracker
// ---------------------------------------------------------------------------

/// Consecutive failure counts, keyed by a resource key.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: RetryPolicy,
    failures: HashMap<String, u32>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryTracker {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn record_failure(&mut self, key: &str) -> Duration {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        *count += 1;
        self.policy.delay(*count - 1)
    }

    /// Forget the failure history of `key`; the next failure starts over.
    pub fn record_success(&mut self, key: &str) {
        self.failures.remove(key);
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay_ms, 1000);
        assert_eq!(p.max_delay_ms, 300_000);
        assert!(matches!(p.strategy, BackoffStrategy::Exponential));
    }

    #[test]
    fn fixed_delay() {
        let p = RetryPolicy::new(BackoffStrategy::Fixed, 500, 10_000);
        assert_eq!(p.delay_ms(0), 500);
        assert_eq!(p.delay_ms(5), 500);
    }

    #[test]
    fn linear_delay() {
        let p = RetryPolicy::new(BackoffStrategy::Linear, 1000, 10_000);
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(1), 2000);
        assert_eq!(p.delay_ms(2), 3000);
    }

    #[test]
    fn exponential_delay_is_capped() {
        let p = RetryPolicy::new(BackoffStrategy::Exponential, 1000, 5000);
        assert_eq!(p.delay_ms(0), 1000);
        assert_eq!(p.delay_ms(1), 2000);
        assert_eq!(p.delay_ms(2), 4000);
        assert_eq!(p.delay_ms(3), 5000);
        assert_eq!(p.delay_ms(60), 5000);
    }

    #[test]
    fn tracker_grows_then_resets() {
        let mut tracker =
            RetryTracker::new(RetryPolicy::new(BackoffStrategy::Exponential, 100, 10_000));
        assert_eq!(tracker.record_failure("ns/a"), Duration::from_millis(100));
        assert_eq!(tracker.record_failure("ns/a"), Duration::from_millis(200));
        assert_eq!(tracker.failure_count("ns/a"), 2);
        tracker.record_success("ns/a");
        assert_eq!(tracker.failure_count("ns/a"), 0);
        assert_eq!(tracker.record_failure("ns/a"), Duration::from_millis(100));
    }

    #[test]
    fn tracker_independent_keys() {
        let mut tracker = RetryTracker::new(RetryPolicy::new(BackoffStrategy::Linear, 10, 1000));
        tracker.record_failure("ns/a");
        tracker.record_failure("ns/a");
        assert_eq!(tracker.record_failure("ns/b"), Duration::from_millis(10));
    }
}
