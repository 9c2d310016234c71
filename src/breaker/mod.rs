//! Circuit breaker for external provider operations.
//!
//! Strict closed/open with blind expiry: `threshold` consecutive failures on
//! a key open the circuit for `open_window`; while open, callers short-circuit
//! to a degraded path without attempting the call. Any success resets the
//! failure count immediately. There is no half-open probe state.
//!
//! State lives in a [`KeyValueStore`] so single-process deployments use the
//! in-memory backend and multi-instance deployments can share breaker state
//! through SQLite with identical semantics.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KeyValueStore;
use crate::logger::{self, LogTag};
use crate::observability::counters;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_OPEN_WINDOW: Duration = Duration::from_secs(60);

pub struct CircuitBreaker {
    store: Arc<dyn KeyValueStore>,
}

fn open_key(key: &str) -> String {
    format!("cb:{}:open", key)
}

fn fail_key(key: &str) -> String {
    format!("cb:{}:failures", key)
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether the circuit for `key` is currently open. Store failures are
    /// treated as "closed": the breaker must never fail closed and starve a
    /// healthy provider.
    pub async fn is_open(&self, key: &str) -> bool {
        match self.store.get(&open_key(key)).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                logger::warning(LogTag::Breaker, &format!("breaker store read failed: {}", e));
                false
            }
        }
    }

    /// Record one failure; opens the circuit once `threshold` consecutive
    /// failures accumulate.
    pub async fn record_failure(&self, key: &str, threshold: u32, open_window: Duration) {
        let count = match self.store.incr(&fail_key(key), 1).await {
            Ok(count) => count,
            Err(e) => {
                logger::warning(LogTag::Breaker, &format!("breaker store incr failed: {}", e));
                return;
            }
        };
        if count >= threshold as i64 {
            let _ = self.store.set(&open_key(key), "1", Some(open_window)).await;
            let _ = self.store.del(&fail_key(key)).await;
            counters().inc(&format!("breaker.opened.{}", key));
            logger::warning(
                LogTag::Breaker,
                &format!("circuit opened for {} after {} failures", key, count),
            );
        }
    }

    pub async fn record_failure_default(&self, key: &str) {
        self.record_failure(key, DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_WINDOW)
            .await;
    }

    /// A single success closes the circuit and zeroes the failure count.
    pub async fn record_success(&self, key: &str) {
        let _ = self.store.del(&open_key(key)).await;
        let _ = self.store.del(&fail_key(key)).await;
    }

    pub async fn reset(&self, key: &str) {
        self.record_success(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKvStore, SqliteKvStore};

    fn breaker_with_memory() -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = breaker_with_memory();
        for _ in 0..4 {
            cb.record_failure("coingecko:price", 5, Duration::from_secs(60)).await;
            assert!(!cb.is_open("coingecko:price").await);
        }
        cb.record_failure("coingecko:price", 5, Duration::from_secs(60)).await;
        assert!(cb.is_open("coingecko:price").await);
    }

    #[tokio::test]
    async fn success_resets_immediately() {
        let cb = breaker_with_memory();
        for _ in 0..5 {
            cb.record_failure("k", 5, Duration::from_secs(60)).await;
        }
        assert!(cb.is_open("k").await);
        cb.record_success("k").await;
        assert!(!cb.is_open("k").await);

        // Failure count starts over after a success.
        cb.record_failure("k", 5, Duration::from_secs(60)).await;
        assert!(!cb.is_open("k").await);
    }

    #[tokio::test]
    async fn open_window_expires_blindly() {
        let cb = breaker_with_memory();
        for _ in 0..3 {
            cb.record_failure("k", 3, Duration::from_millis(20)).await;
        }
        assert!(cb.is_open("k").await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cb.is_open("k").await);
    }

    #[tokio::test]
    async fn identical_semantics_on_sqlite_backend() {
        let cb = CircuitBreaker::new(Arc::new(SqliteKvStore::open_in_memory().unwrap()));
        for _ in 0..5 {
            cb.record_failure("k", 5, Duration::from_secs(60)).await;
        }
        assert!(cb.is_open("k").await);
        cb.record_success("k").await;
        assert!(!cb.is_open("k").await);
    }
}
