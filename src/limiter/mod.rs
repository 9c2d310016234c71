//! Per-provider token-bucket rate limiting with a concurrency gate.
//!
//! Each provider gets one bucket for the process lifetime. Admission checks
//! refill the bucket lazily from elapsed wall-clock time; when no token is
//! available the caller sleeps for the estimated accrual time and retries.
//! Concurrency is bounded by a semaphore whose permit is held for the whole
//! call via an RAII guard. The limiter never fails closed: waiting callers
//! are admitted as soon as tokens accrue, and inner call errors propagate
//! untouched.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::logger::{self, LogTag};
use crate::providers::ProviderId;

/// Minimum sleep when waiting for a token, to avoid busy spinning on very
/// fast refill rates.
const MIN_WAIT: Duration = Duration::from_millis(100);

pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// RAII guard returned by [`RateLimiter::acquire`]. Holding it keeps one
/// concurrency slot occupied; dropping it admits the next queued caller.
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_minute: f64, concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec: refill_per_minute / 60.0,
        }
    }

    /// Wait until both a concurrency slot and a token are available.
    pub async fn acquire(&self) -> Result<RateLimitGuard, String> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| format!("failed to acquire rate limiter permit: {}", e))?;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(RateLimitGuard { _permit: permit });
                }
                let needed = 1.0 - bucket.tokens;
                Duration::from_secs_f64(needed / self.refill_per_sec).max(MIN_WAIT)
            };
            logger::verbose(
                LogTag::Limiter,
                &format!("bucket empty, deferring {}ms", wait.as_millis()),
            );
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Tokens currently available (after a refill), for introspection.
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}

/// Registry of one limiter per provider, constructed once at process start.
/// These limits are tunable policy, not hard provider contracts.
pub struct RateLimiterRegistry {
    limiters: HashMap<ProviderId, RateLimiter>,
}

impl RateLimiterRegistry {
    pub fn with_defaults() -> Self {
        let mut limiters = HashMap::new();
        // capacity / refill-per-minute / concurrency
        limiters.insert(ProviderId::Dexscreener, RateLimiter::new(60, 60.0, 6));
        limiters.insert(ProviderId::Coingecko, RateLimiter::new(50, 50.0, 5));
        limiters.insert(ProviderId::Dune, RateLimiter::new(5, 5.0, 2));
        limiters.insert(ProviderId::Bitquery, RateLimiter::new(5, 5.0, 2));
        limiters.insert(ProviderId::Moralis, RateLimiter::new(10, 10.0, 2));
        // No published budget for these; reuse the coingecko-class profile.
        limiters.insert(ProviderId::Thegraph, RateLimiter::new(50, 50.0, 5));
        limiters.insert(ProviderId::Etherscan, RateLimiter::new(50, 50.0, 5));
        Self { limiters }
    }

    pub fn acquire(
        &self,
        id: ProviderId,
    ) -> impl std::future::Future<Output = Result<RateLimitGuard, String>> + '_ {
        let limiter = self
            .limiters
            .get(&id)
            .unwrap_or_else(|| panic!("no rate limiter registered for {}", id.as_str()));
        limiter.acquire()
    }
}

static GLOBAL_LIMITERS: LazyLock<RateLimiterRegistry> =
    LazyLock::new(RateLimiterRegistry::with_defaults);

/// Global limiter registry. One bucket per provider across the process, so
/// throttling holds no matter which service issues the call.
pub fn limiters() -> &'static RateLimiterRegistry {
    &GLOBAL_LIMITERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_bucket_admits_capacity_then_defers() {
        // 2 tokens, 60/min refill => third admission needs ~1s of accrual.
        let limiter = RateLimiter::new(2, 60.0, 8);

        let start = Instant::now();
        let _a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));

        let deferred = tokio::time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(deferred.is_err(), "third call should be deferred until refill");

        let third = tokio::time::timeout(Duration::from_secs(3), limiter.acquire()).await;
        assert!(third.is_ok(), "third call should be admitted after tokens accrue");
    }

    #[tokio::test]
    async fn concurrency_gate_queues_until_guard_drops() {
        let limiter = Arc::new(RateLimiter::new(10, 600.0, 1));

        let guard = limiter.acquire().await.unwrap();
        let pending = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished(), "second call must wait for the slot");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("queued call should run once the guard drops")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn tokens_refill_toward_capacity() {
        let limiter = RateLimiter::new(2, 600.0, 4);
        let _a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert!(limiter.available_tokens().await < 1.0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        // 10 tokens/sec refill: at least one token back after 150ms.
        assert!(limiter.available_tokens().await >= 1.0);
    }
}
