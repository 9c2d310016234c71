//! Shared HTTP plumbing for provider adapters.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use rand::Rng;

/// One shared connection pool for all adapters. Per-call timeouts are set at
/// the request level since they differ by provider.
static HTTP: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent("chainboard/0.1")
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

pub fn http() -> &'static reqwest::Client {
    &HTTP
}

/// Retry an async operation with exponential backoff and jitter:
/// `base * 2^attempt + random(0..100ms)`. Used for transient provider
/// failures; rate-limit waits and breaker short-circuits are never retried
/// through this.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut last_err = String::from("no attempts made");
    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = e;
                if attempt + 1 < attempts {
                    let jitter = rand::thread_rng().gen_range(0..100);
                    let delay = base_delay * 2u32.pow(attempt) + Duration::from_millis(jitter);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err)
}

/// Round a latency up to its 100ms bucket, capped, for counter keys.
pub fn latency_bucket(elapsed: Duration, cap_ms: u64) -> u64 {
    let ms = elapsed.as_millis() as u64;
    (ms.div_ceil(100) * 100).min(cap_ms).max(100)
}

/// `[since, till]` UTC day window covering the last `days` days inclusive of
/// today. Providers are always queried with an explicit window; open-ended
/// "since forever" queries come back empty on several APIs.
pub fn utc_day_window(days: u32) -> (NaiveDate, NaiveDate) {
    let till = Utc::now().date_naive();
    let since = till
        .checked_sub_days(Days::new(days.saturating_sub(1) as u64))
        .unwrap_or(till);
    (since, till)
}

/// ASC list of `YYYY-MM-DD` strings for the same window.
pub fn day_sequence(days: u32) -> Vec<String> {
    let (since, _) = utc_day_window(days);
    (0..days)
        .filter_map(|i| since.checked_add_days(Days::new(i as u64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_surfaces_last_error_after_exhaustion() {
        let out: Result<(), String> =
            retry_with_backoff(3, Duration::from_millis(1), || async {
                Err("still down".to_string())
            })
            .await;
        assert_eq!(out, Err("still down".to_string()));
    }

    #[test]
    fn latency_buckets_round_up_and_cap() {
        assert_eq!(latency_bucket(Duration::from_millis(1), 1000), 100);
        assert_eq!(latency_bucket(Duration::from_millis(101), 1000), 200);
        assert_eq!(latency_bucket(Duration::from_millis(5000), 1000), 1000);
    }

    #[test]
    fn day_sequence_is_ascending_and_ends_today() {
        let seq = day_sequence(7);
        assert_eq!(seq.len(), 7);
        assert!(seq.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seq.last().unwrap(), &Utc::now().date_naive().format("%Y-%m-%d").to_string());
    }
}
