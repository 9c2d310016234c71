//! TTL-bounded metric snapshot persistence and freshness orchestration.

pub mod orchestrator;
pub mod store;

pub use orchestrator::{
    ensure_fresh_snapshot, metric_key, refresh_snapshots_for_project, AssemblerCollector,
    MetricCollector, MetricFamily, ProjectRefreshResult, RefreshOptions, RefreshOutcome,
};
pub use store::{is_snapshot_expired, MetricSnapshot, SnapshotPayload, SnapshotStore};
