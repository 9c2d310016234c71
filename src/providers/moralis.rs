//! Moralis deep-index API: holder lists, holder stats and transfer series.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use num_traits::Zero;
use serde_json::Value;

use crate::config::get_config_clone;
use crate::limiter::limiters;
use crate::logger::{self, LogTag};
use crate::observability::counters;
use crate::providers::client::{self, http};
use crate::providers::{DayCount, ProviderId, RawHolder};

const BASE_URL: &str = "https://deep-index.moralis.io/api/v2.2";
const TIMEOUT: Duration = Duration::from_secs(15);
/// Moralis caps page size at 100 regardless of the requested limit.
const PAGE_LIMIT: u32 = 100;
/// Safety cap on cursor pagination.
const MAX_PAGES: u32 = 200;

fn normalize_chain(chain: &str) -> &'static str {
    let c = chain.to_ascii_lowercase();
    if c.contains("polygon") || c.contains("matic") {
        "polygon"
    } else if c.contains("base") {
        "base"
    } else if c.contains("arb") {
        "arbitrum"
    } else {
        "eth"
    }
}

fn api_key() -> Result<String, String> {
    get_config_clone()
        .moralis_api_key
        .ok_or_else(|| "MORALIS_API_KEY not configured".to_string())
}

async fn get_json(url: &str, key: &str) -> Result<Value, String> {
    let _guard = limiters().acquire(ProviderId::Moralis).await?;
    let t0 = Instant::now();
    let result = async {
        let resp = http()
            .get(url)
            .header("X-API-Key", key)
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("moralis request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("moralis returned {}", status));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("moralis response parse failed: {}", e))
    }
    .await;
    match &result {
        Ok(_) => {
            counters().inc("providers.moralis.calls");
            let bucket = client::latency_bucket(t0.elapsed(), 1000);
            counters().inc(&format!("providers.moralis.latency_ms.{}", bucket));
        }
        Err(e) => {
            counters().inc("providers.moralis.errors");
            logger::warning(LogTag::Api, &format!("moralis call failed: {}", e));
        }
    }
    result
}

/// Parse a balance that providers encode as either a decimal string or a
/// plain number. Fractions and junk parse as zero.
fn parse_raw_balance(v: &Value) -> BigUint {
    match v {
        Value::String(s) => s.trim().parse::<BigUint>().unwrap_or_else(|_| BigUint::zero()),
        Value::Number(n) => n
            .as_u64()
            .map(BigUint::from)
            .unwrap_or_else(BigUint::zero),
        _ => BigUint::zero(),
    }
}

fn result_items(data: &Value) -> &[Value] {
    data.get("result")
        .or_else(|| data.get("items"))
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
}

fn next_cursor(data: &Value) -> Option<String> {
    data.get("cursor")
        .or_else(|| data.get("next"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Total holder count from the stats endpoint. `Ok(None)` means the endpoint
/// answered but reported no usable count.
pub async fn holder_stats(contract: &str, chain: &str) -> Result<Option<u64>, String> {
    let key = api_key()?;
    let url = format!(
        "{}/erc20/{}/holders?chain={}",
        BASE_URL,
        contract,
        normalize_chain(chain)
    );
    let data = get_json(&url, &key).await?;

    // Field name has drifted across API revisions.
    let total = ["totalHolders", "total", "holders", "address_count", "count"]
        .iter()
        .filter_map(|f| data.get(*f))
        .filter_map(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .find(|n| *n > 0);
    Ok(total)
}

/// Full holder list via cursor pagination over `/owners`. Balances for the
/// same address across pages are summed in the raw integer domain. Returns
/// holders sorted by balance descending plus the distinct-holder count.
pub async fn top_holders(contract: &str, chain: &str) -> Result<(Vec<RawHolder>, u64), String> {
    let key = api_key()?;
    let chain_slug = normalize_chain(chain);
    let base = format!("{}/erc20/{}/owners", BASE_URL, contract);

    let mut balances: BTreeMap<String, BigUint> = BTreeMap::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let mut url = format!("{}?chain={}&limit={}", base, chain_slug, PAGE_LIMIT);
        if let Some(c) = &cursor {
            url.push_str("&cursor=");
            url.push_str(c);
        }
        let data = get_json(&url, &key).await?;
        for item in result_items(&data) {
            let addr = item
                .get("owner_address")
                .or_else(|| item.get("address"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if addr.is_empty() {
                continue;
            }
            let v = item.get("balance").map(parse_raw_balance).unwrap_or_else(BigUint::zero);
            let entry = balances.entry(addr).or_insert_with(BigUint::zero);
            *entry += v;
        }
        cursor = next_cursor(&data);
        pages += 1;
        if cursor.is_none() || pages >= MAX_PAGES {
            break;
        }
    }

    let total = balances.len() as u64;
    let mut holders: Vec<RawHolder> = balances
        .into_iter()
        .map(|(address, balance)| RawHolder { address, balance })
        .collect();
    holders.sort_by(|a, b| b.balance.cmp(&a.balance));
    logger::debug(
        LogTag::Api,
        &format!("moralis collected {} holders over {} pages", total, pages),
    );
    Ok((holders, total))
}

/// Daily transfer counts for the contract over the last `days` UTC days,
/// ASC, with zero-filled gaps.
pub async fn tx_series(contract: &str, chain: &str, days: u32) -> Result<Vec<DayCount>, String> {
    let key = api_key()?;
    let chain_slug = normalize_chain(chain);
    let (since, till) = client::utc_day_window(days);
    let base = format!("{}/erc20/{}/transfers", BASE_URL, contract);

    let mut per_day: BTreeMap<String, u64> = BTreeMap::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let mut url = format!(
            "{}?chain={}&from_date={}&to_date={}&limit={}",
            base, chain_slug, since, till, PAGE_LIMIT
        );
        if let Some(c) = &cursor {
            url.push_str("&cursor=");
            url.push_str(c);
        }
        let data = get_json(&url, &key).await?;
        for item in result_items(&data) {
            let Some(ts) = item.get("block_timestamp").and_then(|v| v.as_str()) else {
                continue;
            };
            if ts.len() < 10 {
                continue;
            }
            *per_day.entry(ts[..10].to_string()).or_insert(0) += 1;
        }
        cursor = next_cursor(&data);
        pages += 1;
        if cursor.is_none() || pages >= 100 {
            break;
        }
    }

    Ok(client::day_sequence(days)
        .into_iter()
        .map(|date| {
            let count = per_day.get(&date).copied().unwrap_or(0);
            DayCount { date, count }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_normalization() {
        assert_eq!(normalize_chain("Ethereum"), "eth");
        assert_eq!(normalize_chain("polygon"), "polygon");
        assert_eq!(normalize_chain("matic"), "polygon");
        assert_eq!(normalize_chain("arbitrum-one"), "arbitrum");
        assert_eq!(normalize_chain("unknown"), "eth");
    }

    #[test]
    fn raw_balance_parsing_tolerates_encodings() {
        assert_eq!(
            parse_raw_balance(&json!("123456789012345678901234567890")).to_string(),
            "123456789012345678901234567890"
        );
        assert_eq!(parse_raw_balance(&json!(42)), BigUint::from(42u32));
        assert!(parse_raw_balance(&json!("not a number")).is_zero());
        assert!(parse_raw_balance(&json!(null)).is_zero());
    }

    #[test]
    fn cursor_extraction_ignores_empty() {
        assert_eq!(next_cursor(&json!({"cursor": "abc"})), Some("abc".to_string()));
        assert_eq!(next_cursor(&json!({"cursor": ""})), None);
        assert_eq!(next_cursor(&json!({"next": "n"})), Some("n".to_string()));
        assert_eq!(next_cursor(&json!({})), None);
    }
}
