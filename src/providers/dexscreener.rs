//! Dexscreener adapter: pair discovery, best-pair selection, token metadata.
//! No API key required.

use std::time::Duration;

use serde::Deserialize;

use crate::limiter::limiters;
use crate::observability::counters;
use crate::providers::client::{self, http};
use crate::providers::ProviderId;

const BASE_URL: &str = "https://api.dexscreener.com/latest/dex";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DexPair {
    pub chain_id: Option<String>,
    pub dex_id: Option<String>,
    pub pair_address: Option<String>,
    /// Dexscreener encodes price as a decimal string.
    pub price_usd: Option<String>,
    pub liquidity: Option<Liquidity>,
    pub volume: Option<Volume>,
    pub price_change: Option<PriceChange>,
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    pub base_token: Option<TokenInfo>,
    pub quote_token: Option<TokenInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PriceChange {
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenInfo {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub logo_url: String,
}

impl DexPair {
    pub fn price_usd_f64(&self) -> f64 {
        self.price_usd
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn liquidity_usd(&self) -> f64 {
        let v = self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }

    pub fn volume_h24(&self) -> f64 {
        self.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

pub fn map_chain(chain: &str) -> &'static str {
    let c = chain.to_ascii_lowercase();
    if c.contains("polygon") {
        "polygon"
    } else if c.contains("base") {
        "base"
    } else if c.contains("arb") {
        "arbitrum"
    } else {
        "ethereum"
    }
}

/// All pairs trading the token, across chains.
pub async fn get_pairs(contract: &str) -> Result<Vec<DexPair>, String> {
    let url = format!("{}/tokens/{}", BASE_URL, contract);
    let _guard = limiters().acquire(ProviderId::Dexscreener).await?;
    let body = client::retry_with_backoff(3, Duration::from_millis(300), || {
        let url = url.clone();
        async move {
            let resp = http()
                .get(&url)
                .timeout(TIMEOUT)
                .send()
                .await
                .map_err(|e| format!("dexscreener request failed: {}", e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(format!("dexscreener returned {}", status));
            }
            resp.json::<PairsResponse>()
                .await
                .map_err(|e| format!("dexscreener response parse failed: {}", e))
        }
    })
    .await;
    match body {
        Ok(resp) => {
            counters().inc("providers.dexscreener.calls");
            Ok(resp.pairs.unwrap_or_default())
        }
        Err(e) => {
            counters().inc("providers.dexscreener.errors");
            Err(e)
        }
    }
}

/// The deepest-liquidity pair on the wanted chain, falling back to any chain
/// when the token has no pairs there.
pub async fn get_best_pair(contract: &str, chain: &str) -> Result<Option<DexPair>, String> {
    let want = map_chain(chain);
    let pairs = get_pairs(contract).await?;
    Ok(select_best_pair(pairs, want))
}

fn select_best_pair(pairs: Vec<DexPair>, want_chain: &str) -> Option<DexPair> {
    let filtered: Vec<DexPair> = pairs
        .iter()
        .filter(|p| p.chain_id.as_deref().map(|c| c.to_ascii_lowercase()) == Some(want_chain.to_string()))
        .cloned()
        .collect();
    let list = if filtered.is_empty() { pairs } else { filtered };
    list.into_iter()
        .max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Token name/symbol from the best pair; logo URLs are predictable.
pub async fn token_metadata(contract: &str, chain: &str) -> Result<TokenMetadata, String> {
    let best = get_best_pair(contract, chain).await?;
    let base = best.and_then(|p| p.base_token);
    Ok(TokenMetadata {
        name: base
            .as_ref()
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| "Token".to_string()),
        symbol: base
            .and_then(|t| t.symbol)
            .unwrap_or_else(|| "TKN".to_string()),
        logo_url: format!(
            "https://dd.dexscreener.com/ds-data/tokens/{}/{}.png",
            map_chain(chain),
            contract.to_ascii_lowercase()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(chain: &str, dex: &str, liq: f64, price: &str) -> DexPair {
        DexPair {
            chain_id: Some(chain.to_string()),
            dex_id: Some(dex.to_string()),
            price_usd: Some(price.to_string()),
            liquidity: Some(Liquidity { usd: Some(liq) }),
            ..Default::default()
        }
    }

    #[test]
    fn best_pair_prefers_wanted_chain_then_liquidity() {
        let pairs = vec![
            pair("ethereum", "uniswap", 100.0, "1.0"),
            pair("ethereum", "sushiswap", 900.0, "1.1"),
            pair("base", "aerodrome", 5000.0, "1.2"),
        ];
        let best = select_best_pair(pairs, "ethereum").unwrap();
        assert_eq!(best.dex_id.as_deref(), Some("sushiswap"));
    }

    #[test]
    fn best_pair_falls_back_to_any_chain() {
        let pairs = vec![pair("base", "aerodrome", 5000.0, "1.2")];
        let best = select_best_pair(pairs, "ethereum").unwrap();
        assert_eq!(best.chain_id.as_deref(), Some("base"));
        assert!(select_best_pair(vec![], "ethereum").is_none());
    }

    #[test]
    fn price_string_parsing() {
        assert_eq!(pair("ethereum", "d", 0.0, "0.0421").price_usd_f64(), 0.0421);
        assert_eq!(DexPair::default().price_usd_f64(), 0.0);
    }

    #[test]
    fn chain_mapping() {
        assert_eq!(map_chain("Ethereum"), "ethereum");
        assert_eq!(map_chain("arbitrum"), "arbitrum");
        assert_eq!(map_chain("something-else"), "ethereum");
    }
}
