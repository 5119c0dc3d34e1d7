//! Per-object retry backoff for failed reconciles.

use dashmap::DashMap;
use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Delay before the `failures`-th retry: `min(5s * 2^(failures-1), 5min)`.
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    BASE_DELAY
        .saturating_mul(1u32 << exponent)
        .min(MAX_DELAY)
}

/// Consecutive failure counts keyed by `namespace/name`
#[derive(Default)]
pub struct FailureTracker {
    failures: DashMap<String, u32>,
}

impl FailureTracker {
    /// Record a failure and return the delay before the next attempt.
    pub fn record_failure(&self, key: &str) -> Duration {
        let mut count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        backoff_delay(*count)
    }

    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|c| *c).unwrap_or(0)
    }
}
