//! Freshness policy on top of the snapshot store.
//!
//! `ensure_fresh_snapshot` serves a stored snapshot while it is fresh and
//! otherwise runs a caller-supplied collection, persists it, and re-reads
//! the canonical record. The read-then-write is deliberately not atomic:
//! concurrent callers on an expired key may both collect and both upsert,
//! and the last writer wins (snapshots are idempotent and cheap to redo).
//!
//! `refresh_snapshots_for_project` sweeps the fixed metric registry. One
//! metric's failure never aborts its siblings; each outcome is recorded.

use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::logger::{self, LogTag};
use crate::metrics::{
    assemble_holders_metric, assemble_liquidity_mix_metric, assemble_price_metric,
    assemble_top_holders_metric, assemble_transactions_metric, assemble_volume_metric,
    AssembledMetric, ProjectContext, TimeRange,
};
use crate::observability::counters;
use crate::providers::service::ProviderService;
use crate::snapshots::store::{
    is_snapshot_expired, MetricSnapshot, SnapshotPayload, SnapshotStore,
};

/// The six metric families the sweep maintains per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    Holders,
    Volume,
    Transactions,
    Price,
    TopHolders,
    LiquidityMix,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 6] = [
        MetricFamily::Holders,
        MetricFamily::Volume,
        MetricFamily::Transactions,
        MetricFamily::Price,
        MetricFamily::TopHolders,
        MetricFamily::LiquidityMix,
    ];

    /// Versioned key base. The `V2` suffix namespaces against older metric
    /// shapes still present in long-lived databases.
    pub fn key_base(&self) -> &'static str {
        match self {
            MetricFamily::Holders => "holdersV2",
            MetricFamily::Volume => "volumeV2",
            MetricFamily::Transactions => "transactionsV2",
            MetricFamily::Price => "priceV2",
            MetricFamily::TopHolders => "topHoldersV2",
            MetricFamily::LiquidityMix => "liquidityMixV2",
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        match self {
            MetricFamily::Holders => 10,
            MetricFamily::Volume => 5,
            MetricFamily::Transactions => 5,
            MetricFamily::Price => 1,
            MetricFamily::TopHolders => 30,
            MetricFamily::LiquidityMix => 10,
        }
    }

    /// Whether the family is collected once per time range.
    pub fn ranged(&self) -> bool {
        matches!(
            self,
            MetricFamily::Holders | MetricFamily::Volume | MetricFamily::Transactions
        )
    }
}

/// `<family>V2:<projectId>[:<range>]`.
pub fn metric_key(family: MetricFamily, project_id: &str, range: Option<TimeRange>) -> String {
    match range {
        Some(r) => format!("{}:{}:{}", family.key_base(), project_id, r.as_str()),
        None => format!("{}:{}", family.key_base(), project_id),
    }
}

/// Collection seam used by the sweep, so refresh policy can be exercised
/// without live providers.
#[async_trait]
pub trait MetricCollector: Send + Sync {
    async fn collect(
        &self,
        project: &ProjectContext,
        family: MetricFamily,
        range: Option<TimeRange>,
    ) -> Result<AssembledMetric, String>;
}

/// Production collector dispatching to the metric assembler.
pub struct AssemblerCollector<'a> {
    pub svc: &'a ProviderService,
}

#[async_trait]
impl MetricCollector for AssemblerCollector<'_> {
    async fn collect(
        &self,
        project: &ProjectContext,
        family: MetricFamily,
        range: Option<TimeRange>,
    ) -> Result<AssembledMetric, String> {
        let range = range.unwrap_or(TimeRange::Week);
        Ok(match family {
            MetricFamily::Holders => assemble_holders_metric(self.svc, project, range).await,
            MetricFamily::Volume => assemble_volume_metric(self.svc, project, range).await,
            MetricFamily::Transactions => {
                assemble_transactions_metric(self.svc, project, range).await
            }
            MetricFamily::Price => assemble_price_metric(self.svc, project).await,
            MetricFamily::TopHolders => {
                assemble_top_holders_metric(self.svc, project, 10).await
            }
            MetricFamily::LiquidityMix => {
                assemble_liquidity_mix_metric(self.svc, project).await
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub metric: String,
    pub refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRefreshResult {
    pub project_id: String,
    pub outcomes: Vec<RefreshOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    /// Millisecond epoch used for freshness checks and `collected_at`;
    /// defaults to the wall clock.
    pub now: Option<i64>,
    pub force: bool,
    /// Time ranges swept for ranged families; defaults to 24h/7d/30d/90d.
    pub ranges: Option<Vec<TimeRange>>,
}

fn persist_collected(
    store: &SnapshotStore,
    project_id: &str,
    metric: &str,
    collected: &AssembledMetric,
    ttl_minutes: i64,
    now: i64,
) -> AppResult<MetricSnapshot> {
    store.upsert_snapshot(SnapshotPayload {
        project_id: project_id.to_string(),
        metric: metric.to_string(),
        value: serde_json::to_value(&collected.value)?,
        source: collected.source.clone(),
        data_empty: collected.value.is_empty(),
        ttl_minutes,
        collected_at: now,
    })
}

/// Serve a fresh stored snapshot, or collect, persist and re-read. Returns
/// the canonical stored record. Persistence failures propagate; a snapshot
/// that cannot be durably stored must not be reported as cached.
pub async fn ensure_fresh_snapshot<F, Fut>(
    store: &SnapshotStore,
    project: &ProjectContext,
    metric_key: &str,
    ttl_minutes: i64,
    now: i64,
    collect: F,
) -> AppResult<Option<MetricSnapshot>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<AssembledMetric, String>>,
{
    if let Some(fresh) = store.get_fresh_snapshot(&project.id, metric_key, now)? {
        return Ok(Some(fresh));
    }

    let collected = collect().await.map_err(AppError::Collection)?;
    persist_collected(store, &project.id, metric_key, &collected, ttl_minutes, now)?;
    store.get_fresh_snapshot(&project.id, metric_key, now)
}

/// Sweep every configured metric for one project, refreshing whatever is
/// missing, expired, or forced. Failures are isolated per metric.
pub async fn refresh_snapshots_for_project(
    store: &SnapshotStore,
    collector: &dyn MetricCollector,
    project: &ProjectContext,
    options: RefreshOptions,
) -> ProjectRefreshResult {
    let now = options.now.unwrap_or_else(|| Utc::now().timestamp_millis());
    let ranges = options
        .ranges
        .unwrap_or_else(|| TimeRange::DEFAULT_SWEEP.to_vec());
    let mut outcomes = Vec::new();

    for family in MetricFamily::ALL {
        let active: Vec<Option<TimeRange>> = if family.ranged() {
            ranges.iter().copied().map(Some).collect()
        } else {
            vec![None]
        };
        for range in active {
            let key = metric_key(family, &project.id, range);
            let outcome =
                refresh_one(store, collector, project, family, range, &key, now, options.force)
                    .await;
            outcomes.push(outcome);
        }
    }

    ProjectRefreshResult { project_id: project.id.clone(), outcomes }
}

#[allow(clippy::too_many_arguments)]
async fn refresh_one(
    store: &SnapshotStore,
    collector: &dyn MetricCollector,
    project: &ProjectContext,
    family: MetricFamily,
    range: Option<TimeRange>,
    key: &str,
    now: i64,
    force: bool,
) -> RefreshOutcome {
    let existing = match store.get_latest_snapshot(&project.id, key) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            counters().inc(&format!("snapshots.refresh.error.{}", family.key_base()));
            return RefreshOutcome {
                metric: key.to_string(),
                refreshed: false,
                reason: None,
                error: Some(e.to_string()),
                source: None,
            };
        }
    };

    let should_refresh =
        force || existing.as_ref().map_or(true, |s| is_snapshot_expired(s, now));
    if !should_refresh {
        return RefreshOutcome {
            metric: key.to_string(),
            refreshed: false,
            reason: Some("fresh".to_string()),
            error: None,
            source: None,
        };
    }

    let collected = match collector.collect(project, family, range).await {
        Ok(collected) => collected,
        Err(e) => {
            counters().inc(&format!("snapshots.refresh.error.{}", family.key_base()));
            logger::warning(
                LogTag::Sweep,
                &format!("collection failed for {}: {}", key, e),
            );
            return RefreshOutcome {
                metric: key.to_string(),
                refreshed: false,
                reason: None,
                error: Some(e),
                source: None,
            };
        }
    };

    if collected.source == "synthetic" || collected.value.is_empty() {
        counters().inc(&format!("snapshots.synthetic.{}", family.key_base()));
    }

    match persist_collected(store, &project.id, key, &collected, family.ttl_minutes(), now) {
        Ok(_) => {
            counters().inc(&format!("snapshots.refresh.success.{}", family.key_base()));
            RefreshOutcome {
                metric: key.to_string(),
                refreshed: true,
                reason: None,
                error: None,
                source: Some(collected.source),
            }
        }
        Err(e) => {
            counters().inc(&format!("snapshots.refresh.error.{}", family.key_base()));
            RefreshOutcome {
                metric: key.to_string(),
                refreshed: false,
                reason: None,
                error: Some(e.to_string()),
                source: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn project() -> ProjectContext {
        ProjectContext {
            id: "p1".to_string(),
            contract_address: "0xabc0000000000000000000000000000000000000".to_string(),
            chain: "ethereum".to_string(),
        }
    }

    fn price_metric(price: f64) -> AssembledMetric {
        AssembledMetric {
            source: "coingecko".to_string(),
            value: MetricValue::Price {
                price,
                change_24h: 0.0,
                market_cap: None,
                volume_24h: 0.0,
            },
        }
    }

    #[test]
    fn metric_keys_follow_the_convention() {
        assert_eq!(
            metric_key(MetricFamily::Holders, "p1", Some(TimeRange::Week)),
            "holdersV2:p1:7d"
        );
        assert_eq!(metric_key(MetricFamily::Price, "p1", None), "priceV2:p1");
        assert_eq!(
            metric_key(MetricFamily::LiquidityMix, "p1", None),
            "liquidityMixV2:p1"
        );
    }

    #[tokio::test]
    async fn fresh_snapshot_short_circuits_collection() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let project = project();
        let key = metric_key(MetricFamily::Price, &project.id, None);

        let first = ensure_fresh_snapshot(&store, &project, &key, 5, 1_000, || async {
            Ok(price_metric(1.0))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(first.source, "coingecko");

        // Still fresh: the collect closure must not run.
        let called = AtomicBool::new(false);
        let second = ensure_fresh_snapshot(&store, &project, &key, 5, 2_000, || {
            called.store(true, Ordering::SeqCst);
            async { Ok(price_metric(99.0)) }
        })
        .await
        .unwrap()
        .unwrap();
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(second.collected_at, 1_000);
    }

    #[tokio::test]
    async fn expired_snapshot_triggers_collection_and_persists() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let project = project();
        let key = metric_key(MetricFamily::Price, &project.id, None);

        ensure_fresh_snapshot(&store, &project, &key, 1, 0, || async { Ok(price_metric(1.0)) })
            .await
            .unwrap();

        // TTL of 1 minute elapsed exactly: expired, recollect.
        let refreshed = ensure_fresh_snapshot(&store, &project, &key, 1, 60_000, || async {
            Ok(price_metric(2.0))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(refreshed.collected_at, 60_000);
        assert_eq!(refreshed.expires_at, 120_000);
        assert_eq!(refreshed.value["price"], 2.0);
    }

    #[tokio::test]
    async fn collection_failure_propagates_from_ensure_fresh() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let project = project();
        let err = ensure_fresh_snapshot(&store, &project, "priceV2:p1", 1, 0, || async {
            Err("provider exploded".to_string())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Collection(_)));
        // Nothing was stored.
        assert!(store.get_latest_snapshot("p1", "priceV2:p1").unwrap().is_none());
    }

    struct StubCollector {
        fail_on: Option<(MetricFamily, Option<TimeRange>)>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetricCollector for StubCollector {
        async fn collect(
            &self,
            _project: &ProjectContext,
            family: MetricFamily,
            range: Option<TimeRange>,
        ) -> Result<AssembledMetric, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some((family, range)) {
                return Err("volume provider down".to_string());
            }
            Ok(price_metric(1.0))
        }
    }

    #[tokio::test]
    async fn sweep_isolates_a_failing_metric() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let collector = StubCollector {
            fail_on: Some((MetricFamily::Volume, Some(TimeRange::Day))),
            calls: AtomicU32::new(0),
        };
        let result = refresh_snapshots_for_project(
            &store,
            &collector,
            &project(),
            RefreshOptions { now: Some(1_000), ..Default::default() },
        )
        .await;

        // 3 ranged families x 4 ranges + 3 unranged families.
        assert_eq!(result.outcomes.len(), 15);
        let failed: Vec<_> = result.outcomes.iter().filter(|o| o.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].metric, "volumeV2:p1:24h");
        assert!(!failed[0].refreshed);
        assert_eq!(result.outcomes.iter().filter(|o| o.refreshed).count(), 14);
    }

    #[tokio::test]
    async fn sweep_skips_fresh_metrics_unless_forced() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let collector = StubCollector { fail_on: None, calls: AtomicU32::new(0) };
        let p = project();

        refresh_snapshots_for_project(
            &store,
            &collector,
            &p,
            RefreshOptions { now: Some(1_000), ..Default::default() },
        )
        .await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 15);

        // Immediately again: everything fresh, nothing collected.
        let second = refresh_snapshots_for_project(
            &store,
            &collector,
            &p,
            RefreshOptions { now: Some(2_000), ..Default::default() },
        )
        .await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 15);
        assert!(second
            .outcomes
            .iter()
            .all(|o| !o.refreshed && o.reason.as_deref() == Some("fresh")));

        // Force overrides freshness.
        refresh_snapshots_for_project(
            &store,
            &collector,
            &p,
            RefreshOptions { now: Some(3_000), force: true, ..Default::default() },
        )
        .await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 30);
    }
}
