//! CoinGecko price adapter. Tries the contract endpoint for rich market data
//! first, then the simple token-price endpoint. Circuit breaking and the
//! Dexscreener fallback live in the provider service, not here.

use std::time::Duration;

use serde_json::Value;

use crate::limiter::limiters;
use crate::observability::counters;
use crate::providers::client::http;
use crate::providers::{PriceQuote, ProviderId};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const TIMEOUT: Duration = Duration::from_secs(10);

/// CoinGecko asset-platform identifier for a chain name.
pub fn map_platform(chain: &str) -> &'static str {
    match chain.to_ascii_lowercase().as_str() {
        "polygon" => "polygon-pos",
        "base" => "base",
        "arbitrum" => "arbitrum-one",
        _ => "ethereum",
    }
}

async fn get_json(url: &str, query: &[(&str, &str)]) -> Result<Value, String> {
    let _guard = limiters().acquire(ProviderId::Coingecko).await?;
    let result = async {
        let resp = http()
            .get(url)
            .query(query)
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("coingecko request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("coingecko returned {}", status));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("coingecko response parse failed: {}", e))
    }
    .await;
    match &result {
        Ok(_) => counters().inc("providers.coingecko.calls"),
        Err(_) => counters().inc("providers.coingecko.errors"),
    }
    result
}

fn num(v: Option<&Value>) -> f64 {
    v.and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// USD price and market data for a token contract. Errs when neither
/// endpoint yields a usable price.
pub async fn token_price(contract: &str, chain: &str) -> Result<PriceQuote, String> {
    let platform = map_platform(chain);

    // Contract endpoint first, for richer market data.
    let contract_url = format!("{}/coins/{}/contract/{}", BASE_URL, platform, contract);
    if let Ok(body) = get_json(&contract_url, &[]).await {
        let md = body.get("market_data").cloned().unwrap_or(Value::Null);
        let price = num(md.pointer("/current_price/usd"));
        if price > 0.0 {
            counters().inc("coingecko.price.success");
            return Ok(PriceQuote {
                price,
                change_24h: num(md.get("price_change_percentage_24h")),
                market_cap: md.pointer("/market_cap/usd").and_then(|v| v.as_f64()),
                volume_24h: num(md.pointer("/total_volume/usd")),
            });
        }
    }
    counters().inc("coingecko.price.failure");

    // Simple token-price endpoint as the in-adapter fallback.
    let simple_url = format!("{}/simple/token_price/{}", BASE_URL, platform);
    let body = get_json(
        &simple_url,
        &[
            ("contract_addresses", contract),
            ("vs_currencies", "usd"),
            ("include_24hr_change", "true"),
            ("include_market_cap", "true"),
            ("include_24hr_vol", "true"),
        ],
    )
    .await?;
    let entry = body
        .get(contract.to_ascii_lowercase().as_str())
        .or_else(|| body.as_object().and_then(|o| o.values().next()))
        .cloned()
        .unwrap_or(Value::Null);
    let price = num(entry.get("usd"));
    if price > 0.0 {
        counters().inc("coingecko.price.success");
        Ok(PriceQuote {
            price,
            change_24h: num(entry.get("usd_24h_change")),
            market_cap: entry.get("usd_market_cap").and_then(|v| v.as_f64()),
            volume_24h: num(entry.get("usd_24h_vol")),
        })
    } else {
        counters().inc("coingecko.price.failure");
        Err("coingecko returned no usable price".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_mapping() {
        assert_eq!(map_platform("ethereum"), "ethereum");
        assert_eq!(map_platform("Polygon"), "polygon-pos");
        assert_eq!(map_platform("arbitrum"), "arbitrum-one");
        assert_eq!(map_platform("dogechain"), "ethereum");
    }
}
