//! BitQuery GraphQL adapter: holder counts, top holders, holder and transfer
//! series. Top-holder balances come back already normalized to token units,
//! which the holders service accounts for when computing shares.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::get_config_clone;
use crate::limiter::limiters;
use crate::logger::{self, LogTag};
use crate::observability::counters;
use crate::providers::client::{self, http};
use crate::providers::{DayCount, DayValue, ProviderId};

/// v2 streaming endpoint; the daily-series queries still go through the v1
/// cube exposed on the same gateway.
const ENDPOINT: &str = "https://streaming.bitquery.io/eap";
const TIMEOUT: Duration = Duration::from_secs(30);

/// Network slug for the v2 EVM dataset.
fn evm_network(chain: &str) -> &'static str {
    let c = chain.to_ascii_lowercase();
    if c.contains("polygon") || c.contains("matic") {
        "matic"
    } else if c.contains("base") {
        "base"
    } else if c.contains("arb") {
        "arbitrum"
    } else {
        "eth"
    }
}

/// Network slug for the legacy ethereum cube (daily series queries).
fn legacy_network(chain: &str) -> &'static str {
    let c = chain.to_ascii_lowercase();
    if c.contains("polygon") || c.contains("matic") {
        "polygon"
    } else if c.contains("base") {
        "base"
    } else if c.contains("arb") {
        "arbitrum"
    } else {
        "ethereum"
    }
}

async fn post_graphql(query: &str, variables: Value) -> Result<Value, String> {
    let Some(key) = get_config_clone().bitquery_api_key else {
        counters().inc("providers.bitquery.missing_key");
        return Err("BITQUERY_API_KEY not configured".to_string());
    };
    let _guard = limiters().acquire(ProviderId::Bitquery).await?;
    let t0 = Instant::now();
    let result = async {
        let resp = http()
            .post(ENDPOINT)
            .bearer_auth(&key)
            .json(&json!({ "query": query, "variables": variables }))
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("bitquery request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            counters().inc(&format!("providers.bitquery.http.{}", status.as_u16()));
            return Err(format!("bitquery returned {}", status));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("bitquery response parse failed: {}", e))
    }
    .await;
    match &result {
        Ok(body) => {
            counters().inc("providers.bitquery.calls");
            let bucket = client::latency_bucket(t0.elapsed(), 2000);
            counters().inc(&format!("providers.bitquery.latency_ms.{}", bucket));
            if body.get("errors").and_then(|e| e.as_array()).is_some_and(|e| !e.is_empty()) {
                counters().inc("providers.bitquery.graphql_errors");
                logger::warning(LogTag::Api, "bitquery response carries GraphQL errors");
            }
        }
        Err(e) => {
            counters().inc("providers.bitquery.errors");
            logger::warning(LogTag::Api, &format!("bitquery call failed: {}", e));
        }
    }
    result
}

/// Distinct positive-balance holder count for the token.
pub async fn holder_count(contract: &str, chain: &str) -> Result<u64, String> {
    let query = r#"
      query ($network: evm_network, $token: String!) {
        EVM(network: $network) {
          BalanceUpdates(
            where: {
              Currency: {SmartContract: {is: $token}}
              BalanceUpdate: {Amount: {gt: "0"}}
            }
            limitBy: {by: BalanceUpdate_Address, count: 1}
            limit: {count: 100000}
          ) {
            count
          }
        }
      }
    "#;
    let resp = post_graphql(
        query,
        json!({ "network": evm_network(chain), "token": contract }),
    )
    .await?;
    let total = resp
        .pointer("/data/EVM/BalanceUpdates/0/count")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0);
    Ok(total)
}

/// Top holders with balances normalized to token units (BitQuery aggregates
/// in decimal amounts). Addresses lowercased, zero/invalid rows dropped.
pub async fn top_holders(
    contract: &str,
    chain: &str,
    limit: usize,
) -> Result<Vec<(String, f64)>, String> {
    let limit = limit.clamp(1, 200);
    let query = r#"
      query ($network: evm_network, $token: String!, $limit: Int!) {
        EVM(network: $network) {
          BalanceUpdates(
            where: {Currency: {SmartContract: {is: $token}}}
            orderBy: {descendingByField: "balance"}
            limit: {count: $limit}
          ) {
            BalanceUpdate { Address }
            balance: sum(of: BalanceUpdate_Amount, selectWhere: {ge: "0"})
          }
        }
      }
    "#;
    let resp = post_graphql(
        query,
        json!({ "network": evm_network(chain), "token": contract, "limit": limit }),
    )
    .await?;
    let rows = resp
        .pointer("/data/EVM/BalanceUpdates")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let mut top: Vec<(String, f64)> = rows
        .iter()
        .filter_map(|row| {
            let address = row
                .pointer("/BalanceUpdate/Address")
                .and_then(|v| v.as_str())?
                .to_ascii_lowercase();
            let balance = parse_decimal(row.get("balance")?);
            if address.is_empty() || !balance.is_finite() || balance <= 0.0 {
                return None;
            }
            Some((address, balance))
        })
        .collect();
    top.truncate(limit);
    Ok(top)
}

/// Daily distinct receivers over an explicit `[since, till]` window.
pub async fn holder_series(
    contract: &str,
    chain: &str,
    since: &str,
    till: &str,
) -> Result<Vec<DayValue>, String> {
    let query = r#"
      query ($network: EthereumNetwork!, $address: String!, $since: ISO8601DateTime, $till: ISO8601DateTime) {
        ethereum(network: $network) {
          transfers(
            date: {since: $since, till: $till}
            currency: {is: $address}
          ) {
            date: date { date }
            distinctReceivers: count(uniq: receiver)
          }
        }
      }
    "#;
    let resp = post_graphql(
        query,
        json!({
            "network": legacy_network(chain),
            "address": contract,
            "since": since,
            "till": till,
        }),
    )
    .await?;
    let rows = resp
        .pointer("/data/ethereum/transfers")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(rows
        .iter()
        .filter_map(|row| {
            let date = row.pointer("/date/date").and_then(|v| v.as_str())?;
            if date.len() < 10 {
                return None;
            }
            let value = row
                .get("distinctReceivers")
                .map(parse_decimal)
                .unwrap_or(0.0);
            Some(DayValue { date: date[..10].to_string(), value })
        })
        .collect())
}

/// Daily transfer counts touching the address over the last `days` days, ASC.
pub async fn tx_series(contract: &str, chain: &str, days: u32) -> Result<Vec<DayCount>, String> {
    let (since, till) = client::utc_day_window(days);
    let query = r#"
      query ($network: EthereumNetwork!, $address: String!, $since: ISO8601DateTime, $till: ISO8601DateTime) {
        ethereum(network: $network) {
          transfers(
            date: {since: $since, till: $till}
            any: [{sender: {is: $address}}, {receiver: {is: $address}}]
          ) {
            date: date { date }
            c: count
          }
        }
      }
    "#;
    let resp = post_graphql(
        query,
        json!({
            "network": legacy_network(chain),
            "address": contract,
            "since": since.to_string(),
            "till": till.to_string(),
        }),
    )
    .await?;
    let rows = resp
        .pointer("/data/ethereum/transfers")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let mut series: Vec<DayCount> = rows
        .iter()
        .filter_map(|row| {
            let date = row.pointer("/date/date").and_then(|v| v.as_str())?;
            if date.len() < 10 {
                return None;
            }
            let count = row
                .get("c")
                .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or(0);
            Some(DayCount { date: date[..10].to_string(), count })
        })
        .collect();
    series.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(series)
}

fn parse_decimal(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_mapping_per_api_era() {
        assert_eq!(evm_network("ethereum"), "eth");
        assert_eq!(evm_network("polygon"), "matic");
        assert_eq!(legacy_network("ethereum"), "ethereum");
        assert_eq!(legacy_network("matic"), "polygon");
        assert_eq!(legacy_network("base"), "base");
    }

    #[test]
    fn decimal_parsing_covers_string_and_number() {
        assert_eq!(parse_decimal(&json!("12.5")), 12.5);
        assert_eq!(parse_decimal(&json!(3)), 3.0);
        assert_eq!(parse_decimal(&json!("junk")), 0.0);
        assert_eq!(parse_decimal(&json!(null)), 0.0);
    }
}
