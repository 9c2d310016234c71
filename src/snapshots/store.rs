//! Snapshot persistence. Pure storage contract with no freshness policy:
//! idempotent upsert keyed by `(project_id, metric)`, read-time expiry
//! filtering (expired rows are filtered, never deleted), and an explicit
//! delete for admin/test tooling. Timestamps are millisecond epochs.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::AppResult;
use crate::logger::{self, LogTag};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub project_id: String,
    pub metric: String,
    pub value: serde_json::Value,
    pub source: String,
    pub data_empty: bool,
    pub collected_at: i64,
    pub ttl_minutes: i64,
    pub expires_at: i64,
    pub created_at: i64,
}

pub struct SnapshotPayload {
    pub project_id: String,
    pub metric: String,
    pub value: serde_json::Value,
    pub source: String,
    pub data_empty: bool,
    pub ttl_minutes: i64,
    pub collected_at: i64,
}

/// `now >= expires_at`: a snapshot expires exactly at its boundary.
pub fn is_snapshot_expired(snapshot: &MetricSnapshot, now: i64) -> bool {
    now >= snapshot.expires_at
}

fn compute_expiry(collected_at: i64, ttl_minutes: i64) -> i64 {
    collected_at + ttl_minutes * 60_000
}

pub struct SnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotStore {
    pub fn open(path: &str) -> AppResult<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metric_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                metric TEXT NOT NULL,
                value TEXT NOT NULL,
                source TEXT NOT NULL,
                data_empty INTEGER NOT NULL DEFAULT 0,
                collected_at INTEGER NOT NULL,
                ttl_minutes INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(project_id, metric)
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_expiry
                ON metric_snapshots (project_id, expires_at);",
        )?;
        logger::debug(LogTag::Snapshots, "snapshot store ready");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Idempotent write. The expiry is recomputed from this call's TTL every
    /// time; `created_at` survives updates.
    pub fn upsert_snapshot(&self, payload: SnapshotPayload) -> AppResult<MetricSnapshot> {
        let expires_at = compute_expiry(payload.collected_at, payload.ttl_minutes);
        let value_text = serde_json::to_string(&payload.value)?;
        {
            let conn = self.conn.lock().expect("snapshot store lock poisoned");
            conn.execute(
                "INSERT INTO metric_snapshots
                    (project_id, metric, value, source, data_empty,
                     collected_at, ttl_minutes, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?6)
                 ON CONFLICT(project_id, metric) DO UPDATE SET
                     value = excluded.value,
                     source = excluded.source,
                     data_empty = excluded.data_empty,
                     collected_at = excluded.collected_at,
                     ttl_minutes = excluded.ttl_minutes,
                     expires_at = excluded.expires_at",
                params![
                    payload.project_id,
                    payload.metric,
                    value_text,
                    payload.source,
                    payload.data_empty as i64,
                    payload.collected_at,
                    payload.ttl_minutes,
                    expires_at,
                ],
            )?;
        }
        self.get_latest_snapshot(&payload.project_id, &payload.metric)?
            .ok_or_else(|| {
                rusqlite::Error::QueryReturnedNoRows.into()
            })
    }

    pub fn get_latest_snapshot(
        &self,
        project_id: &str,
        metric: &str,
    ) -> AppResult<Option<MetricSnapshot>> {
        let conn = self.conn.lock().expect("snapshot store lock poisoned");
        let row = conn
            .query_row(
                "SELECT project_id, metric, value, source, data_empty,
                        collected_at, ttl_minutes, expires_at, created_at
                 FROM metric_snapshots
                 WHERE project_id = ?1 AND metric = ?2",
                params![project_id, metric],
                map_snapshot_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Latest snapshot, filtered by expiry at read time. Expired rows stay in
    /// place as the last-known value.
    pub fn get_fresh_snapshot(
        &self,
        project_id: &str,
        metric: &str,
        now: i64,
    ) -> AppResult<Option<MetricSnapshot>> {
        Ok(self
            .get_latest_snapshot(project_id, metric)?
            .filter(|s| !is_snapshot_expired(s, now)))
    }

    pub fn delete_snapshot(&self, project_id: &str, metric: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("snapshot store lock poisoned");
        conn.execute(
            "DELETE FROM metric_snapshots WHERE project_id = ?1 AND metric = ?2",
            params![project_id, metric],
        )?;
        Ok(())
    }
}

fn map_snapshot_row(row: &Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    let value_text: String = row.get(2)?;
    Ok(MetricSnapshot {
        project_id: row.get(0)?,
        metric: row.get(1)?,
        value: serde_json::from_str(&value_text).unwrap_or(serde_json::Value::Null),
        source: row.get(3)?,
        data_empty: row.get::<_, i64>(4)? != 0,
        collected_at: row.get(5)?,
        ttl_minutes: row.get(6)?,
        expires_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(collected_at: i64, ttl_minutes: i64, value: serde_json::Value) -> SnapshotPayload {
        SnapshotPayload {
            project_id: "p1".to_string(),
            metric: "priceV2:p1".to_string(),
            value,
            source: "coingecko".to_string(),
            data_empty: false,
            ttl_minutes,
            collected_at,
        }
    }

    #[test]
    fn upsert_is_idempotent_and_recomputes_expiry() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let first = store
            .upsert_snapshot(payload(1_000_000, 5, json!({"price": 1.0})))
            .unwrap();
        assert_eq!(first.expires_at, 1_000_000 + 5 * 60_000);

        // Second write with different value, time, and TTL: still one row,
        // fields match the second call, expiry exact.
        let second = store
            .upsert_snapshot(payload(2_000_000, 10, json!({"price": 2.0})))
            .unwrap();
        assert_eq!(second.value, json!({"price": 2.0}));
        assert_eq!(second.collected_at, 2_000_000);
        assert_eq!(second.ttl_minutes, 10);
        assert_eq!(second.expires_at, 2_000_000 + 10 * 60_000);
        // created_at survives the update.
        assert_eq!(second.created_at, first.created_at);

        let latest = store.get_latest_snapshot("p1", "priceV2:p1").unwrap().unwrap();
        assert_eq!(latest, second);
    }

    #[test]
    fn expiry_is_inclusive_at_the_boundary() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let snap = store
            .upsert_snapshot(payload(0, 1, json!({"v": 1})))
            .unwrap();
        assert_eq!(snap.expires_at, 60_000);

        assert!(!is_snapshot_expired(&snap, 59_999));
        assert!(is_snapshot_expired(&snap, 60_000));
        assert!(is_snapshot_expired(&snap, 60_001));

        assert!(store.get_fresh_snapshot("p1", "priceV2:p1", 59_999).unwrap().is_some());
        assert!(store.get_fresh_snapshot("p1", "priceV2:p1", 60_000).unwrap().is_none());
        // Expired read does not delete the row.
        assert!(store.get_latest_snapshot("p1", "priceV2:p1").unwrap().is_some());
    }

    #[test]
    fn delete_removes_the_row() {
        let store = SnapshotStore::open_in_memory().unwrap();
        store.upsert_snapshot(payload(0, 1, json!({"v": 1}))).unwrap();
        store.delete_snapshot("p1", "priceV2:p1").unwrap();
        assert!(store.get_latest_snapshot("p1", "priceV2:p1").unwrap().is_none());
    }

    #[test]
    fn snapshots_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");
        let path = path.to_str().unwrap();

        let store = SnapshotStore::open(path).unwrap();
        store.upsert_snapshot(payload(1_000, 5, json!({"price": 7.0}))).unwrap();
        drop(store);

        let reopened = SnapshotStore::open(path).unwrap();
        let snap = reopened.get_latest_snapshot("p1", "priceV2:p1").unwrap().unwrap();
        assert_eq!(snap.value, json!({"price": 7.0}));
        assert_eq!(snap.collected_at, 1_000);
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        let store = SnapshotStore::open_in_memory().unwrap();
        assert!(store.get_latest_snapshot("p1", "nothing").unwrap().is_none());
        assert!(store.get_fresh_snapshot("p1", "nothing", 0).unwrap().is_none());
    }
}
