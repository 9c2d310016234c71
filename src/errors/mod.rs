/// Structured error types for the snapshot and persistence layers.
///
/// Provider failures are deliberately NOT represented here: adapters return
/// `Result<T, String>` and the provider service converts every failure into
/// a tagged degraded value. Only errors that must propagate to the
/// orchestrator's caller (storage, serialization, collection) live in this
/// enum.
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Snapshot or key-value persistence failure. A snapshot that cannot be
    /// durably stored must not be treated as successfully cached.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A metric collection closure failed inside `ensure_fresh_snapshot`.
    /// Sweep-level collection failures are isolated per metric instead and
    /// never reach this variant.
    #[error("metric collection failed: {0}")]
    Collection(String),
}
