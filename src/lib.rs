//! Metric snapshot caching and provider-fallback orchestration for on-chain
//! token analytics.
//!
//! The pipeline, leaf to root: per-provider rate limiting ([`limiter`]) and
//! circuit breaking ([`breaker`]) guard the provider adapters
//! ([`providers`]); the holders service ([`holders`]) and provider façade
//! compose them with graceful degradation; the metric assembler
//! ([`metrics`]) shapes typed payloads; and the snapshot layer
//! ([`snapshots`]) persists them per `(project, metric)` key with TTL-based
//! freshness.

pub mod breaker;
pub mod config;
pub mod errors;
pub mod format;
pub mod holders;
pub mod kv;
pub mod limiter;
pub mod logger;
pub mod metrics;
pub mod observability;
pub mod onchain;
pub mod providers;
pub mod snapshots;

pub use errors::{AppError, AppResult};
pub use metrics::{MetricValue, ProjectContext, TimeRange};
pub use snapshots::{SnapshotStore, MetricSnapshot};
