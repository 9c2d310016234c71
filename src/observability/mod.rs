//! Operational counters.
//!
//! A passive sink the core writes to: provider call counts, errors, latency
//! buckets, circuit short-circuits, synthetic-data incidence. Counters live
//! in process memory; when a shared store is attached, increments are
//! mirrored to it fire-and-forget and `snapshot()` merges the shared view so
//! multi-instance deployments see fleet-wide totals.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock, Mutex};

use once_cell::sync::OnceCell;

use crate::kv::KeyValueStore;

const KV_PREFIX: &str = "metrics:";

pub struct Counters {
    values: Mutex<HashMap<String, u64>>,
    mirror: OnceCell<Arc<dyn KeyValueStore>>,
}

impl Counters {
    fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()), mirror: OnceCell::new() }
    }

    /// Attach a shared store for fleet-wide counter visibility. First call
    /// wins; later calls are ignored.
    pub fn attach_store(&self, store: Arc<dyn KeyValueStore>) {
        let _ = self.mirror.set(store);
    }

    pub fn inc(&self, key: &str) {
        self.inc_by(key, 1);
    }

    pub fn inc_by(&self, key: &str, by: u64) {
        {
            let mut values = self.values.lock().expect("counters lock poisoned");
            *values.entry(key.to_string()).or_insert(0) += by;
        }
        if let Some(store) = self.mirror.get() {
            // Fire-and-forget mirror; counter writes must never slow or fail
            // the calling operation.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let store = Arc::clone(store);
                let kv_key = format!("{}{}", KV_PREFIX, key);
                handle.spawn(async move {
                    let _ = store.incr(&kv_key, by as i64).await;
                });
            }
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.values
            .lock()
            .expect("counters lock poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.values.lock().expect("counters lock poisoned").clear();
    }

    /// Snapshot all counters, merging the shared store when attached. The
    /// shared value wins for keys present in both (it is the fleet total).
    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        let mut snap: BTreeMap<String, u64> = {
            let values = self.values.lock().expect("counters lock poisoned");
            values.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        if let Some(store) = self.mirror.get() {
            if let Ok(entries) = store.scan(KV_PREFIX).await {
                for (key, value) in entries {
                    let name = key.trim_start_matches(KV_PREFIX).to_string();
                    let num = value.parse::<i64>().unwrap_or(0).max(0) as u64;
                    snap.insert(name, num);
                }
            }
        }
        snap
    }
}

static COUNTERS: LazyLock<Counters> = LazyLock::new(Counters::new);

/// Global counter registry.
pub fn counters() -> &'static Counters {
    &COUNTERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inc_and_snapshot() {
        let c = Counters::new();
        c.inc("providers.moralis.calls");
        c.inc_by("providers.moralis.calls", 2);
        c.inc("providers.moralis.errors");
        assert_eq!(c.get("providers.moralis.calls"), 3);

        let snap = c.snapshot().await;
        assert_eq!(snap["providers.moralis.calls"], 3);
        assert_eq!(snap["providers.moralis.errors"], 1);

        c.reset();
        assert_eq!(c.get("providers.moralis.calls"), 0);
    }

    #[tokio::test]
    async fn snapshot_merges_shared_store() {
        use crate::kv::MemoryKvStore;

        let c = Counters::new();
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        store.incr("metrics:fleet.total", 7).await.unwrap();
        c.attach_store(store);
        c.inc("local.only");

        // Give the mirror task a moment; local.only is also mirrored.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let snap = c.snapshot().await;
        assert_eq!(snap["fleet.total"], 7);
        assert_eq!(snap["local.only"], 1);
    }
}
