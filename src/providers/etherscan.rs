//! Etherscan adapter: best-effort daily transfer counts from recent event
//! logs. Keyless processes skip the call entirely.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::config::get_config_clone;
use crate::limiter::limiters;
use crate::observability::counters;
use crate::providers::client::{self, http};
use crate::providers::{DayCount, ProviderId};

const TIMEOUT: Duration = Duration::from_secs(10);
/// Approximate mainnet blocks per UTC day at ~12s block time.
const BLOCKS_PER_DAY: u64 = 7_200;
/// Etherscan caps getLogs pages at 1000 records.
const LOG_PAGE_SIZE: u32 = 1_000;

fn base_url(chain: &str) -> &'static str {
    let c = chain.to_ascii_lowercase();
    if c.contains("sepolia") {
        "https://api-sepolia.etherscan.io/api"
    } else {
        // Non-ethereum chains would need a Blockscout-style endpoint.
        "https://api.etherscan.io/api"
    }
}

async fn get_json(url: &str, query: &[(&str, &str)]) -> Result<Value, String> {
    let _guard = limiters().acquire(ProviderId::Etherscan).await?;
    let result = async {
        let resp = http()
            .get(url)
            .query(query)
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("etherscan request failed: {}", e))?;
        resp.json::<Value>()
            .await
            .map_err(|e| format!("etherscan response parse failed: {}", e))
    }
    .await;
    match &result {
        Ok(_) => counters().inc("providers.etherscan.calls"),
        Err(_) => counters().inc("providers.etherscan.errors"),
    }
    result
}

/// Current chain head from the proxy endpoint.
async fn latest_block(chain: &str, key: &str) -> Result<u64, String> {
    let body = get_json(
        base_url(chain),
        &[
            ("module", "proxy"),
            ("action", "eth_blockNumber"),
            ("apikey", key),
        ],
    )
    .await?;
    body.get("result")
        .and_then(|v| v.as_str())
        .and_then(|s| s.strip_prefix("0x"))
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| "etherscan eth_blockNumber gave no usable result".to_string())
}

/// Daily transfer counts for the contract over the last `days` UTC days,
/// zero-filled, from recent logs. Coverage depends on how far back the log
/// window reaches; this is a last-resort series source.
pub async fn transfer_counts_daily(
    contract: &str,
    chain: &str,
    days: u32,
) -> Result<Vec<DayCount>, String> {
    let Some(key) = get_config_clone().etherscan_api_key else {
        return Err("ETHERSCAN_API_KEY not configured".to_string());
    };

    let latest = latest_block(chain, &key).await?;
    let from_block = latest
        .saturating_sub(BLOCKS_PER_DAY * days as u64)
        .to_string();
    let page_size = LOG_PAGE_SIZE.to_string();

    let body = get_json(
        base_url(chain),
        &[
            ("module", "logs"),
            ("action", "getLogs"),
            ("address", contract),
            ("fromBlock", from_block.as_str()),
            ("toBlock", "latest"),
            ("page", "1"),
            ("offset", page_size.as_str()),
            ("apikey", key.as_str()),
        ],
    )
    .await?;

    let logs = body
        .get("result")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(bucket_logs(&logs, days))
}

fn bucket_logs(logs: &[Value], days: u32) -> Vec<DayCount> {
    let mut per_day: BTreeMap<String, u64> = client::day_sequence(days)
        .into_iter()
        .map(|d| (d, 0))
        .collect();
    for log in logs {
        let Some(epoch) = log.get("timeStamp").and_then(parse_epoch) else {
            continue;
        };
        let Some(ts) = chrono::DateTime::from_timestamp(epoch, 0) else {
            continue;
        };
        let day = ts.format("%Y-%m-%d").to_string();
        // Logs outside the requested window are dropped, not appended.
        if let Some(count) = per_day.get_mut(&day) {
            *count += 1;
        }
    }
    per_day
        .into_iter()
        .map(|(date, count)| DayCount { date, count })
        .collect()
}

fn parse_epoch(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                i64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn logs_bucket_into_the_day_window() {
        let today_noon = Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
        let epoch = today_noon.timestamp();
        let logs = vec![
            json!({"timeStamp": epoch.to_string()}),
            json!({"timeStamp": format!("{:#x}", epoch)}),
            json!({"timeStamp": "0"}), // 1970, outside window
            json!({"no_ts": true}),
        ];
        let series = bucket_logs(&logs, 7);
        assert_eq!(series.len(), 7);
        assert_eq!(series.last().unwrap().count, 2);
        assert!(series[..6].iter().all(|p| p.count == 0));
    }

    #[test]
    fn chain_base_urls() {
        assert_eq!(base_url("ethereum"), "https://api.etherscan.io/api");
        assert_eq!(base_url("sepolia"), "https://api-sepolia.etherscan.io/api");
        assert_eq!(base_url("base"), "https://api.etherscan.io/api");
    }
}
