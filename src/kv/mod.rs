//! Key-value store capability used by the circuit breaker and the
//! operational counters.
//!
//! Two implementations with identical semantics: an in-memory map for
//! single-process deployments and a SQLite table for deployments where
//! breaker state must be shared across instances. The backend is selected
//! once at process start from configuration and never switched mid-run.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SharedStoreConfig;
use crate::errors::AppResult;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Set a value with an optional TTL. Expiry is enforced at read time.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    async fn del(&self, key: &str) -> AppResult<()>;

    /// Atomically increment an integer value, starting from 0 when missing
    /// or expired. Returns the new value.
    async fn incr(&self, key: &str, by: i64) -> AppResult<i64>;

    /// List live entries whose key starts with `prefix`, sorted by key.
    async fn scan(&self, prefix: &str) -> AppResult<Vec<(String, String)>>;
}

/// Open the shared store described by configuration.
pub fn open_store(config: &SharedStoreConfig) -> AppResult<Arc<dyn KeyValueStore>> {
    match config {
        SharedStoreConfig::Memory => Ok(Arc::new(MemoryKvStore::new())),
        SharedStoreConfig::Sqlite { path } => Ok(Arc::new(SqliteKvStore::open(path)?)),
    }
}
