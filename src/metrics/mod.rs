//! Metric assembly: composes provider-service outputs into the typed,
//! UI-shaped metric payloads the snapshot store persists. Pure composition;
//! every fallback here is a declared degradation (`synthetic` sources,
//! `data_empty` flags), never a silent substitution.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::holders;
use crate::logger::{self, LogTag};
use crate::providers::client::day_sequence;
use crate::providers::service::ProviderService;
use crate::providers::{dune, thegraph, DayCount, DayValue, LiquiditySlice, RankedHolder};

/// Project identity handed in by the caller, already authorization-checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContext {
    pub id: String,
    pub contract_address: String,
    pub chain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub const DEFAULT_SWEEP: [TimeRange; 4] =
        [TimeRange::Day, TimeRange::Week, TimeRange::Month, TimeRange::Quarter];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "24h",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
            TimeRange::All => "all",
        }
    }

    /// Day count behind each range. `24h` spans two calendar days so a
    /// day-over-day delta always has two points.
    pub fn days(&self) -> u32 {
        match self {
            TimeRange::Day => 2,
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
            TimeRange::All => 120,
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            "all" => Ok(TimeRange::All),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

/// Typed snapshot payload, one variant per metric family. Serialized into
/// the snapshot store's `value` column with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MetricValue {
    #[serde(rename_all = "camelCase")]
    Holders {
        total_holders: u64,
        change: f64,
        change_percent: f64,
        chart_data: Vec<DayValue>,
    },
    #[serde(rename_all = "camelCase")]
    Volume {
        volume_24h: f64,
        volume_change: f64,
        chart_data: Vec<DayValue>,
    },
    #[serde(rename_all = "camelCase")]
    Price {
        price: f64,
        change_24h: f64,
        market_cap: Option<f64>,
        volume_24h: f64,
    },
    #[serde(rename_all = "camelCase")]
    Transactions {
        total_tx: u64,
        change: i64,
        chart_data: Vec<DayCount>,
    },
    #[serde(rename_all = "camelCase")]
    TopHolders { holders: Vec<RankedHolder> },
    #[serde(rename_all = "camelCase")]
    LiquidityMix { items: Vec<LiquiditySlice> },
}

impl MetricValue {
    /// Whether the payload carries no real data. Drives the snapshot's
    /// `data_empty` flag and the synthetic-incidence counter.
    pub fn is_empty(&self) -> bool {
        match self {
            MetricValue::Holders { chart_data, .. } => chart_data.is_empty(),
            MetricValue::Volume { chart_data, .. } => chart_data.is_empty(),
            MetricValue::Price { .. } => false,
            MetricValue::Transactions { chart_data, .. } => chart_data.is_empty(),
            MetricValue::TopHolders { holders } => holders.is_empty(),
            MetricValue::LiquidityMix { items } => items.is_empty(),
        }
    }
}

/// An assembled metric plus the tag of what produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledMetric {
    pub source: String,
    pub value: MetricValue,
}

/// Delta between the last two points of a series; fewer than two points
/// means no measurable change.
fn last_two_delta(values: &[f64]) -> (f64, f64) {
    if values.len() < 2 {
        return (0.0, 0.0);
    }
    let last = values[values.len() - 1];
    let prev = values[values.len() - 2];
    let change = last - prev;
    let percent = if prev != 0.0 { change / prev * 100.0 } else { 0.0 };
    (change, percent)
}

pub async fn assemble_holders_metric(
    svc: &ProviderService,
    project: &ProjectContext,
    range: TimeRange,
) -> AssembledMetric {
    let latest = svc.holders_total(&project.contract_address, &project.chain).await;
    let days = range.days();
    let series_res =
        holders::holder_series(&project.contract_address, &project.chain, days).await;

    let (series, source) = if series_res.chart_data.is_empty() {
        logger::debug(LogTag::Metrics, "holder series empty, synthesizing anchored series");
        (synthetic_holder_series(latest.data, days), "synthetic".to_string())
    } else {
        (series_res.chart_data, series_res.source)
    };

    // Change compares the live total against the second-to-last series point.
    let prev = if series.len() > 1 {
        series[series.len() - 2].value
    } else {
        series.first().map(|p| p.value).unwrap_or(latest.data as f64)
    };
    let change = latest.data as f64 - prev;
    let change_percent = if prev != 0.0 { change / prev * 100.0 } else { 0.0 };

    AssembledMetric {
        source,
        value: MetricValue::Holders {
            total_holders: latest.data,
            change,
            change_percent,
            chart_data: series,
        },
    }
}

pub async fn assemble_volume_metric(
    svc: &ProviderService,
    project: &ProjectContext,
    range: TimeRange,
) -> AssembledMetric {
    let pv = svc.price_and_volume(&project.contract_address, &project.chain).await;
    let days = range.days();

    let (series, source) = match thegraph::token_daily_volume_usd(
        &project.contract_address,
        &project.chain,
        days,
    )
    .await
    {
        Ok(series) if !series.is_empty() => (series, "thegraph".to_string()),
        _ => {
            let dune_series = dune::volume_series(days);
            if dune_series.is_empty() {
                logger::debug(LogTag::Metrics, "volume series empty, synthesizing from 24h volume");
                (synthetic_volume_series(pv.volume_24h, days), "synthetic".to_string())
            } else {
                let tag = if dune::has_key() { "dune" } else { "mock" };
                (dune_series, tag.to_string())
            }
        }
    };

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let (volume_change, _) = last_two_delta(&values);

    AssembledMetric {
        source,
        value: MetricValue::Volume {
            volume_24h: pv.volume_24h,
            volume_change,
            chart_data: series,
        },
    }
}

pub async fn assemble_price_metric(
    svc: &ProviderService,
    project: &ProjectContext,
) -> AssembledMetric {
    let pv = svc.price_and_volume(&project.contract_address, &project.chain).await;
    AssembledMetric {
        source: pv.source,
        value: MetricValue::Price {
            price: pv.price,
            change_24h: pv.change_24h,
            market_cap: pv.market_cap,
            volume_24h: pv.volume_24h,
        },
    }
}

pub async fn assemble_transactions_metric(
    svc: &ProviderService,
    project: &ProjectContext,
    range: TimeRange,
) -> AssembledMetric {
    let res = svc
        .tx_series(&project.contract_address, &project.chain, range.days())
        .await;
    let last = res.data.last().map(|p| p.count).unwrap_or(0);
    let prev = if res.data.len() > 1 { res.data[res.data.len() - 2].count } else { last };
    AssembledMetric {
        source: res.source,
        value: MetricValue::Transactions {
            total_tx: last,
            change: last as i64 - prev as i64,
            chart_data: res.data,
        },
    }
}

pub async fn assemble_top_holders_metric(
    svc: &ProviderService,
    project: &ProjectContext,
    limit: usize,
) -> AssembledMetric {
    let res = svc
        .top_holders(&project.contract_address, &project.chain, limit, 0)
        .await;
    AssembledMetric {
        source: res.source,
        value: MetricValue::TopHolders { holders: res.data },
    }
}

pub async fn assemble_liquidity_mix_metric(
    svc: &ProviderService,
    project: &ProjectContext,
) -> AssembledMetric {
    let res = svc.liquidity_mix(&project.contract_address).await;
    AssembledMetric {
        source: res.source,
        value: MetricValue::LiquidityMix { items: res.data },
    }
}

/// Linear ramp from half the current total up to the total, so the chart
/// anchors at today's real number.
pub fn synthetic_holder_series(target: u64, days: u32) -> Vec<DayValue> {
    let base = ((target as f64 / 2.0).round()).max(1.0);
    let days_f = days.max(1) as f64;
    day_sequence(days)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let step = (i as f64 + 1.0) / days_f;
            let value = (base + (step * (target as f64 - base)).round()).max(0.0);
            DayValue { date, value }
        })
        .collect()
}

/// Trend toward the current 24h volume with a bounded sinusoidal wobble.
pub fn synthetic_volume_series(volume_24h: f64, days: u32) -> Vec<DayValue> {
    let base = (volume_24h / 3.0).round().max(0.0);
    let span = (days.max(2) - 1) as f64;
    day_sequence(days)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let trend = base + ((i as f64 / span) * (volume_24h - base)).round();
            let wave = ((i as f64 / 3.0).sin() * base * 0.15).round();
            DayValue { date, value: (trend + wave).max(0.0) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_day_mapping() {
        assert_eq!(TimeRange::Day.days(), 2);
        assert_eq!(TimeRange::Week.days(), 7);
        assert_eq!(TimeRange::Month.days(), 30);
        assert_eq!(TimeRange::Quarter.days(), 90);
        assert_eq!(TimeRange::All.days(), 120);
        assert_eq!("7d".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert_eq!(TimeRange::All.as_str().parse::<TimeRange>().unwrap(), TimeRange::All);
        assert!("1y".parse::<TimeRange>().is_err());
    }

    #[test]
    fn short_series_means_zero_change() {
        assert_eq!(last_two_delta(&[]), (0.0, 0.0));
        assert_eq!(last_two_delta(&[100.0]), (0.0, 0.0));
        let (change, percent) = last_two_delta(&[100.0, 150.0]);
        assert_eq!(change, 50.0);
        assert_eq!(percent, 50.0);
        // Zero previous point: delta reported, percent suppressed.
        assert_eq!(last_two_delta(&[0.0, 10.0]), (10.0, 0.0));
    }

    #[test]
    fn synthetic_holder_series_anchors_to_target() {
        let series = synthetic_holder_series(1000, 7);
        assert_eq!(series.len(), 7);
        assert_eq!(series.last().unwrap().value, 1000.0);
        assert!(series[0].value >= 500.0);
        assert!(series.windows(2).all(|w| w[0].value <= w[1].value));
    }

    #[test]
    fn synthetic_volume_series_stays_non_negative() {
        let series = synthetic_volume_series(0.0, 30);
        assert_eq!(series.len(), 30);
        assert!(series.iter().all(|p| p.value >= 0.0));
        let busy = synthetic_volume_series(90_000.0, 7);
        assert!(busy.last().unwrap().value > busy[0].value * 0.5);
    }

    #[test]
    fn metric_value_emptiness() {
        let empty = MetricValue::TopHolders { holders: vec![] };
        assert!(empty.is_empty());
        let price = MetricValue::Price {
            price: 1.0,
            change_24h: 0.0,
            market_cap: None,
            volume_24h: 0.0,
        };
        assert!(!price.is_empty());
        let tx = MetricValue::Transactions {
            total_tx: 0,
            change: 0,
            chart_data: vec![DayCount { date: "2026-01-01".into(), count: 0 }],
        };
        assert!(!tx.is_empty());
    }

    #[test]
    fn metric_value_serde_tagging() {
        let value = MetricValue::Price {
            price: 1.5,
            change_24h: -2.0,
            market_cap: Some(10.0),
            volume_24h: 3.0,
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "price");
        assert_eq!(json["change24h"], -2.0);
        let back: MetricValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }
}
