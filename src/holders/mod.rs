//! Holder analytics: provider-priority holder lists, on-chain supply reads,
//! burn/LP tagging and share-of-supply computation.
//!
//! Raw balances stay `BigUint` until the decimals-aware normalization right
//! before share math. Share denominators always use the full on-chain supply,
//! never the truncated top-N sum. Both entry points are infallible: every
//! degradation is expressed through `source`, `partial` or `synthetic` flags.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::config::get_config_clone;
use crate::logger::{self, LogTag};
use crate::onchain::ErcReader;
use crate::providers::{bitquery, dexscreener, moralis, DayValue, ProviderId, RawHolder};

pub const BURN_ADDRESSES: [&str; 2] = [
    "0x0000000000000000000000000000000000000000",
    "0x000000000000000000000000000000000000dead",
];

const LIMIT_TOP_MIN: usize = 10;
const LIMIT_TOP_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderTag {
    Burn,
    Lp,
    Exchange,
    Treasury,
    Timelock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopHolder {
    pub address: String,
    /// Balance normalized to token units.
    pub balance: f64,
    /// Share of full on-chain supply, 0..1. Zero when supply is zero.
    pub total_supply_share: f64,
    /// Share of supply minus burn and LP balances, clamped to >= 0.
    pub circulating_share: f64,
    pub tags: Vec<HolderTag>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldersSummary {
    pub top_holders: Vec<TopHolder>,
    pub total_holders: u64,
    pub source: String,
    pub last_updated_at: DateTime<Utc>,
    /// True when no provider yielded data; an empty summary is a valid
    /// terminal state, not an error.
    pub partial: bool,
    /// True when the on-chain supply lookup failed and share percentages
    /// were computed against defaults.
    pub supply_unknown: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderSeries {
    pub chart_data: Vec<DayValue>,
    pub source: String,
    pub synthetic: bool,
}

pub fn is_burn_address(addr: &str) -> bool {
    let a = addr.to_ascii_lowercase();
    BURN_ADDRESSES.contains(&a.as_str())
}

/// Normalize raw smallest-unit balances to token units. This is the single
/// point where arbitrary precision leaves the pipeline.
pub fn normalize_raw(holders: &[RawHolder], decimals: u32) -> Vec<(String, f64)> {
    let denom = 10f64.powi(decimals as i32);
    holders
        .iter()
        .map(|h| {
            let raw = h.balance.to_f64().unwrap_or(0.0);
            let balance = if denom > 0.0 { raw / denom } else { 0.0 };
            (h.address.to_ascii_lowercase(), balance)
        })
        .collect()
}

/// Compute per-holder shares against the full normalized supply. Holders are
/// expected to be pre-truncated; denominators are not.
pub fn calc_shares(
    holders: &[(String, f64)],
    total_supply_norm: f64,
    lp_addresses: &HashSet<String>,
) -> Vec<TopHolder> {
    let mut burn_sum = 0.0;
    let mut lp_sum = 0.0;
    for (address, balance) in holders {
        if is_burn_address(address) {
            burn_sum += balance;
        }
        if lp_addresses.contains(&address.to_ascii_lowercase()) {
            lp_sum += balance;
        }
    }
    let circulating = (total_supply_norm - burn_sum - lp_sum).max(0.0);

    holders
        .iter()
        .map(|(address, balance)| {
            let lower = address.to_ascii_lowercase();
            let mut tags = Vec::new();
            if is_burn_address(&lower) {
                tags.push(HolderTag::Burn);
            }
            if lp_addresses.contains(&lower) {
                tags.push(HolderTag::Lp);
            }
            let total_share = if total_supply_norm > 0.0 { balance / total_supply_norm } else { 0.0 };
            let circ_share = if circulating > 0.0 { balance / circulating } else { 0.0 };
            TopHolder {
                address: lower,
                balance: *balance,
                total_supply_share: total_share,
                circulating_share: circ_share.max(0.0),
                tags,
            }
        })
        .collect()
}

/// LP addresses for the token from Dexscreener pair contracts on the wanted
/// chain. Best effort: a failed lookup yields an empty set, and only
/// unambiguous pair addresses are included (a false LP tag is worse than a
/// missing one).
async fn lp_addresses(contract: &str, chain: &str) -> HashSet<String> {
    let want = dexscreener::map_chain(chain);
    match dexscreener::get_pairs(contract).await {
        Ok(pairs) => pairs
            .iter()
            .filter(|p| p.chain_id.as_deref().map(|c| c.to_ascii_lowercase()).as_deref() == Some(want))
            .filter_map(|p| p.pair_address.as_deref())
            .map(|a| a.to_ascii_lowercase())
            .collect(),
        Err(e) => {
            logger::debug(LogTag::Holders, &format!("lp address lookup failed: {}", e));
            HashSet::new()
        }
    }
}

fn empty_summary(source: &str) -> HoldersSummary {
    HoldersSummary {
        top_holders: Vec::new(),
        total_holders: 0,
        source: source.to_string(),
        last_updated_at: Utc::now(),
        partial: true,
        supply_unknown: false,
    }
}

/// Holder balances as one provider produced them, before normalization.
enum ProviderHolders {
    /// Raw smallest-unit balances (Moralis).
    Raw(Vec<RawHolder>),
    /// Balances already normalized to token units (BitQuery aggregates).
    Normalized(Vec<(String, f64)>),
}

/// Top-holder summary with share computation. Walks the configured provider
/// priority list; the first provider returning at least one holder wins.
pub async fn summary(contract: &str, chain: &str, limit_top: usize) -> HoldersSummary {
    let limit_top = limit_top.clamp(LIMIT_TOP_MIN, LIMIT_TOP_MAX);
    let priority = get_config_clone().holders_priority;

    let mut holders: Option<ProviderHolders> = None;
    let mut total_holders = 0u64;
    let mut source = "mock".to_string();

    for provider in priority {
        if holders.is_some() {
            break;
        }
        match provider {
            ProviderId::Moralis => match moralis::top_holders(contract, chain).await {
                Ok((list, total)) if !list.is_empty() => {
                    // The stats endpoint counts all holders; the paginated
                    // distinct count is only a lower bound.
                    total_holders = moralis::holder_stats(contract, chain)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or(total);
                    holders = Some(ProviderHolders::Raw(list));
                    source = provider.as_str().to_string();
                }
                Ok(_) => logger::debug(LogTag::Holders, "moralis returned zero holders"),
                Err(e) => {
                    logger::warning(LogTag::Holders, &format!("moralis holder fetch failed: {}", e));
                }
            },
            ProviderId::Bitquery => {
                match bitquery::top_holders(contract, chain, limit_top).await {
                    Ok(list) if !list.is_empty() => {
                        total_holders = bitquery::holder_count(contract, chain)
                            .await
                            .unwrap_or(list.len() as u64);
                        holders = Some(ProviderHolders::Normalized(list));
                        source = provider.as_str().to_string();
                    }
                    Ok(_) => logger::debug(LogTag::Holders, "bitquery returned zero holders"),
                    Err(e) => {
                        logger::warning(
                            LogTag::Holders,
                            &format!("bitquery holder fetch failed: {}", e),
                        );
                    }
                }
            }
            // Config parsing only admits holder-capable providers.
            _ => {}
        }
    }

    let Some(holders) = holders else {
        logger::warning(LogTag::Holders, "no holder data available from any provider");
        return empty_summary(&source);
    };

    let meta = ErcReader::from_config().token_meta(contract).await;
    let lps = lp_addresses(contract, chain).await;

    let mut normalized = match holders {
        ProviderHolders::Raw(raw) => normalize_raw(&raw, meta.decimals),
        ProviderHolders::Normalized(n) => n,
    };
    normalized.truncate(limit_top);

    let denom = 10f64.powi(meta.decimals as i32);
    let total_supply_norm = meta.total_supply.to_f64().unwrap_or(0.0) / denom;
    let top = calc_shares(&normalized, total_supply_norm, &lps);

    HoldersSummary {
        top_holders: top,
        total_holders,
        source,
        last_updated_at: Utc::now(),
        partial: false,
        supply_unknown: meta.supply_unknown,
    }
}

/// Holder-growth series. Tries BitQuery over an explicit `[since, till]`
/// window; a miss synthesizes a plausible series and says so.
pub async fn holder_series(contract: &str, chain: &str, days: u32) -> HolderSeries {
    let (since, till) = crate::providers::client::utc_day_window(days);
    match bitquery::holder_series(contract, chain, &since.to_string(), &till.to_string()).await {
        Ok(series) if !series.is_empty() => HolderSeries {
            chart_data: series,
            source: "bitquery".to_string(),
            synthetic: false,
        },
        Ok(_) => synthetic_holder_series(days),
        Err(e) => {
            logger::debug(LogTag::Holders, &format!("holder series fallback: {}", e));
            synthetic_holder_series(days)
        }
    }
}

fn synthetic_holder_series(days: u32) -> HolderSeries {
    let base = 50.0;
    let chart_data = crate::providers::client::day_sequence(days)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let i = i as f64;
            let value = (base + i * 5.0 + ((i / 3.0).sin() * 10.0).round()).max(0.0);
            DayValue { date, value }
        })
        .collect();
    HolderSeries {
        chart_data,
        source: "synthetic".to_string(),
        synthetic: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[test]
    fn worked_share_example() {
        // Raw holders at decimals=0: burn 1000, whale 9000, lp 1000; supply 12000.
        let raw = vec![
            RawHolder {
                address: "0x0000000000000000000000000000000000000000".into(),
                balance: BigUint::from(1000u32),
            },
            RawHolder { address: "0xabc".into(), balance: BigUint::from(9000u32) },
            RawHolder { address: "0xlp".into(), balance: BigUint::from(1000u32) },
        ];
        let normalized = normalize_raw(&raw, 0);
        let lps: HashSet<String> = ["0xlp".to_string()].into_iter().collect();
        let top = calc_shares(&normalized, 12000.0, &lps);

        let whale = top.iter().find(|h| h.address == "0xabc").unwrap();
        assert!((whale.total_supply_share - 0.75).abs() < 1e-12);
        assert!((whale.circulating_share - 0.9).abs() < 1e-12);
        assert!(whale.tags.is_empty());

        let burn = &top[0];
        assert_eq!(burn.tags, vec![HolderTag::Burn]);
        let lp = top.iter().find(|h| h.address == "0xlp").unwrap();
        assert_eq!(lp.tags, vec![HolderTag::Lp]);
    }

    #[test]
    fn zero_supply_yields_zero_shares() {
        let holders = vec![("0xabc".to_string(), 500.0)];
        let top = calc_shares(&holders, 0.0, &HashSet::new());
        assert_eq!(top[0].total_supply_share, 0.0);
        assert_eq!(top[0].circulating_share, 0.0);
    }

    #[test]
    fn circulating_share_never_negative() {
        // Burn balance exceeds reported supply: circulating clamps to zero.
        let holders = vec![
            ("0x000000000000000000000000000000000000dead".to_string(), 5000.0),
            ("0xabc".to_string(), 100.0),
        ];
        let top = calc_shares(&holders, 1000.0, &HashSet::new());
        for h in &top {
            assert!(h.circulating_share >= 0.0);
            assert!(h.total_supply_share >= 0.0);
        }
    }

    #[test]
    fn normalization_applies_decimals() {
        let raw = vec![RawHolder {
            address: "0xABC".into(),
            balance: BigUint::from(1_500_000_000_000_000_000u64), // 1.5 at 18 decimals
        }];
        let norm = normalize_raw(&raw, 18);
        assert_eq!(norm[0].0, "0xabc");
        assert!((norm[0].1 - 1.5).abs() < 1e-12);
    }

    #[test]
    fn burn_address_detection() {
        assert!(is_burn_address("0x0000000000000000000000000000000000000000"));
        assert!(is_burn_address("0x000000000000000000000000000000000000DEAD"));
        assert!(!is_burn_address("0xabc0000000000000000000000000000000000000"));
    }

    #[test]
    fn synthetic_series_is_flagged_and_sized() {
        let s = synthetic_holder_series(30);
        assert!(s.synthetic);
        assert_eq!(s.source, "synthetic");
        assert_eq!(s.chart_data.len(), 30);
        assert!(s.chart_data.iter().all(|p| p.value >= 0.0));
    }
}
