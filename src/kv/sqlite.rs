/// SQLite-backed key-value store for multi-instance deployments where the
/// circuit breaker and counters must be consistent across processes.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::AppResult;

use super::KeyValueStore;

pub struct SqliteKvStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn open(path: &str) -> AppResult<Self> {
        let db = Connection::open(path)?;
        Self::with_connection(db)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> AppResult<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )",
            [],
        )?;
        Ok(Self { db: Arc::new(Mutex::new(db)) })
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let db = self.db.lock().expect("kv db lock poisoned");
        let row: Option<(String, Option<i64>)> = db
            .query_row(
                "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((_, Some(expires_at))) if Self::now_ms() >= expires_at => {
                db.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let expires_at = ttl.map(|t| Self::now_ms() + t.as_millis() as i64);
        let db = self.db.lock().expect("kv db lock poisoned");
        db.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let db = self.db.lock().expect("kv db lock poisoned");
        db.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> AppResult<i64> {
        let db = self.db.lock().expect("kv db lock poisoned");
        let now = Self::now_ms();
        let current: Option<(String, Option<i64>)> = db
            .query_row(
                "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let base = match current {
            Some((_, Some(expires_at))) if now >= expires_at => 0,
            Some((value, _)) => value.parse::<i64>().unwrap_or(0),
            None => 0,
        };
        let next = base + by;
        db.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, NULL)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = NULL",
            params![key, next.to_string()],
        )?;
        Ok(next)
    }

    async fn scan(&self, prefix: &str) -> AppResult<Vec<(String, String)>> {
        let db = self.db.lock().expect("kv db lock poisoned");
        let now = Self::now_ms();
        let mut stmt = db.prepare(
            "SELECT key, value FROM kv_entries
             WHERE key LIKE ?1 ESCAPE '\\' AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )?;
        let pattern = format!(
            "{}%",
            prefix
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let rows = stmt.query_map(params![pattern, now], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
