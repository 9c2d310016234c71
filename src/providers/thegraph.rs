//! TheGraph adapter: daily swap volume aggregated across the subgraphs
//! configured for a chain (Uniswap V2/V3 style `tokenDayDatas`). A failing
//! subgraph degrades the aggregate, never the call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::get_config_clone;
use crate::limiter::limiters;
use crate::logger::{self, LogTag};
use crate::observability::counters;
use crate::providers::client::http;
use crate::providers::{DayValue, ProviderId};

const TIMEOUT: Duration = Duration::from_secs(15);

const DAY_DATA_QUERY: &str = r#"
  query ($addr: String!, $days: Int!) {
    tokenDayDatas(first: $days, orderBy: date, orderDirection: desc, where: { token: $addr }) {
      date
      volumeUSD
      dailyVolumeToken
      priceUSD
    }
  }
"#;

/// Daily token volume in USD, summed across every configured subgraph for
/// the chain, ASC by date. Errs only when no subgraphs are configured.
pub async fn token_daily_volume_usd(
    contract: &str,
    chain: &str,
    days: u32,
) -> Result<Vec<DayValue>, String> {
    let config = get_config_clone();
    let Some(urls) = config.subgraphs.get(&chain.to_ascii_lowercase()).cloned() else {
        return Err(format!("no subgraphs configured for chain {}", chain));
    };

    let addr = contract.to_ascii_lowercase();
    let mut aggregated: BTreeMap<String, f64> = BTreeMap::new();

    for url in urls {
        let _guard = limiters().acquire(ProviderId::Thegraph).await?;
        let result = async {
            let resp = http()
                .post(&url)
                .json(&json!({
                    "query": DAY_DATA_QUERY,
                    "variables": { "addr": addr, "days": days },
                }))
                .timeout(TIMEOUT)
                .send()
                .await
                .map_err(|e| format!("subgraph request failed: {}", e))?;
            resp.json::<Value>()
                .await
                .map_err(|e| format!("subgraph response parse failed: {}", e))
        }
        .await;
        match result {
            Ok(body) => {
                counters().inc("providers.thegraph.calls");
                merge_day_datas(&mut aggregated, &body);
            }
            Err(e) => {
                counters().inc("providers.thegraph.errors");
                logger::warning(LogTag::Api, &format!("subgraph {} failed: {}", url, e));
            }
        }
    }

    Ok(aggregated
        .into_iter()
        .map(|(date, value)| DayValue { date, value })
        .collect())
}

fn merge_day_datas(aggregated: &mut BTreeMap<String, f64>, body: &Value) {
    let rows = body
        .pointer("/data/tokenDayDatas")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for row in rows {
        let Some(epoch) = row.get("date").and_then(|v| v.as_i64()) else {
            continue;
        };
        let Some(day) = chrono::DateTime::from_timestamp(epoch, 0) else {
            continue;
        };
        let date = day.format("%Y-%m-%d").to_string();
        // Some subgraph schemas expose volumeUSD directly, others only a
        // token amount plus price.
        let vol = match row.get("volumeUSD").map(as_f64) {
            Some(v) if v != 0.0 => v,
            _ => {
                as_f64(row.get("dailyVolumeToken").unwrap_or(&Value::Null))
                    * as_f64(row.get("priceUSD").unwrap_or(&Value::Null))
            }
        };
        if !vol.is_finite() {
            continue;
        }
        *aggregated.entry(date).or_insert(0.0) += vol;
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_sums_across_subgraphs_and_derives_missing_usd() {
        let mut agg = BTreeMap::new();
        // 2024-01-01 and 2024-01-02 epochs.
        merge_day_datas(
            &mut agg,
            &json!({"data": {"tokenDayDatas": [
                {"date": 1704067200, "volumeUSD": "100.5"},
                {"date": 1704153600, "dailyVolumeToken": "10", "priceUSD": "2.5"},
            ]}}),
        );
        merge_day_datas(
            &mut agg,
            &json!({"data": {"tokenDayDatas": [
                {"date": 1704067200, "volumeUSD": 50},
            ]}}),
        );
        assert_eq!(agg["2024-01-01"], 150.5);
        assert_eq!(agg["2024-01-02"], 25.0);
    }

    #[test]
    fn merge_ignores_malformed_rows() {
        let mut agg = BTreeMap::new();
        merge_day_datas(
            &mut agg,
            &json!({"data": {"tokenDayDatas": [
                {"volumeUSD": "100"},
                {"date": "not-a-number", "volumeUSD": "100"},
            ]}}),
        );
        assert!(agg.is_empty());
    }
}
