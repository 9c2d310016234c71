/// In-memory key-value store for single-process deployments.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::errors::AppResult;

use super::KeyValueStore;

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(now) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.entries.lock().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> AppResult<i64> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        let now = Instant::now();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + by;
        entries.insert(
            key.to_string(),
            Entry { value: next.to_string(), expires_at: None },
        );
        Ok(next)
    }

    async fn scan(&self, prefix: &str) -> AppResult<Vec<(String, String)>> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        let mut out: Vec<(String, String)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_is_a_read_time_filter() {
        let store = MemoryKvStore::new();
        store.set("k", "v", Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_starts_from_zero() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("c", 1).await.unwrap(), 1);
        assert_eq!(store.incr("c", 2).await.unwrap(), 3);
        store.del("c").await.unwrap();
        assert_eq!(store.incr("c", 1).await.unwrap(), 1);
    }
}
