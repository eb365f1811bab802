//! Retry/backoff policy for store reads.
//!
//! The failure ledger is an explicit map owned by the policy, keyed by query
//! key, with time-based eviction. Permission and auth errors are never
//! retried; everything else gets exponential backoff, bounded per call and by
//! a rolling per-key failure budget so a persistently failing dependency
//! cannot produce a retry storm.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::StoreError;

#[derive(Debug)]
struct QueryWindow {
    failures: u32,
    window_start: Instant,
    last_failure: Instant,
}

pub struct RetryPolicy {
    config: RetryConfig,
    windows: DashMap<String, QueryWindow>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Decide whether the attempt that just failed should be followed by
    /// another one. `attempt` is 1-based: the first failed attempt is 1.
    pub fn should_retry(&self, attempt: u32, error: &StoreError, query_key: &str) -> bool {
        if !error.is_retryable() {
            debug!(query_key, attempt, error = %error, "terminal error, not retrying");
            return false;
        }
        if attempt >= self.config.max_attempts {
            debug!(query_key, attempt, "attempt budget exhausted");
            return false;
        }
        self.record_failure(query_key, Instant::now())
    }

    /// Exponential delay before the next attempt: `base * 2^attempt`, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let millis = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Drop per-key counters that have seen no failure for a full window.
    /// Runs on every recorded failure; also callable directly for callers
    /// that want to trim on their own cadence.
    pub fn evict_stale(&self) {
        let window = self.config.window();
        self.windows
            .retain(|_, entry| entry.last_failure.elapsed() < window);
    }

    /// Record a failure at `now` and report whether the key still has budget
    /// in its rolling window. Counters reset after a quiet window.
    fn record_failure(&self, query_key: &str, now: Instant) -> bool {
        self.evict_stale();
        let window = self.config.window();
        let mut entry = self
            .windows
            .entry(query_key.to_string())
            .or_insert_with(|| QueryWindow {
                failures: 0,
                window_start: now,
                last_failure: now,
            });

        let quiet = now.saturating_duration_since(entry.last_failure) >= window;
        let expired = now.saturating_duration_since(entry.window_start) >= window;
        if quiet || expired {
            entry.failures = 0;
            entry.window_start = now;
        }
        entry.last_failure = now;

        if entry.failures >= self.config.window_max_failures {
            debug!(query_key, failures = entry.failures, "failure window budget exhausted");
            return false;
        }
        entry.failures += 1;
        true
    }
}
