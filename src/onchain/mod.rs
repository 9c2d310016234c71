//! Direct EVM contract reads over JSON-RPC.
//!
//! Only the three ERC-20 views the holders pipeline needs: `decimals()`,
//! `totalSupply()` and `balanceOf(address)`. Results are parsed as
//! arbitrary-precision integers; a failed or unconfigured endpoint degrades
//! to documented defaults with `supply_unknown` set so zero-share output is
//! distinguishable from a failed lookup.

use std::time::Duration;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde_json::json;

use crate::config::get_config_clone;
use crate::logger::{self, LogTag};
use crate::observability::counters;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

// ERC-20 function selectors.
const SEL_DECIMALS: &str = "0x313ce567";
const SEL_TOTAL_SUPPLY: &str = "0x18160ddd";
const SEL_BALANCE_OF: &str = "0x70a08231";

pub const DEFAULT_DECIMALS: u32 = 18;

/// On-chain token metadata, possibly degraded.
#[derive(Debug, Clone)]
pub struct OnchainMeta {
    pub decimals: u32,
    pub total_supply: BigUint,
    /// True when the RPC lookup failed and the values above are defaults.
    pub supply_unknown: bool,
}

impl OnchainMeta {
    pub fn unknown() -> Self {
        Self {
            decimals: DEFAULT_DECIMALS,
            total_supply: BigUint::zero(),
            supply_unknown: true,
        }
    }
}

pub struct ErcReader {
    client: reqwest::Client,
    rpc_url: Option<String>,
}

impl ErcReader {
    pub fn from_config() -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: get_config_clone().rpc_url,
        }
    }

    pub fn with_endpoint(rpc_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), rpc_url }
    }

    /// Fetch `decimals` and `totalSupply`. Never errors: RPC problems return
    /// [`OnchainMeta::unknown`] and callers tolerate degraded shares.
    pub async fn token_meta(&self, contract: &str) -> OnchainMeta {
        let decimals = match self.eth_call(contract, SEL_DECIMALS.to_string()).await {
            Ok(raw) => parse_uint256(&raw)
                .and_then(|v| v.to_u32())
                .unwrap_or(DEFAULT_DECIMALS),
            Err(e) => {
                counters().inc("onchain.errors");
                logger::warning(LogTag::Onchain, &format!("decimals() read failed: {}", e));
                return OnchainMeta::unknown();
            }
        };
        match self.eth_call(contract, SEL_TOTAL_SUPPLY.to_string()).await {
            Ok(raw) => match parse_uint256(&raw) {
                Some(total_supply) => OnchainMeta { decimals, total_supply, supply_unknown: false },
                None => OnchainMeta::unknown(),
            },
            Err(e) => {
                counters().inc("onchain.errors");
                logger::warning(LogTag::Onchain, &format!("totalSupply() read failed: {}", e));
                OnchainMeta::unknown()
            }
        }
    }

    pub async fn balance_of(&self, contract: &str, owner: &str) -> Result<BigUint, String> {
        let data = format!("{}{}", SEL_BALANCE_OF, pad_address(owner)?);
        let raw = self.eth_call(contract, data).await?;
        parse_uint256(&raw).ok_or_else(|| format!("unparseable balanceOf result: {}", raw))
    }

    async fn eth_call(&self, to: &str, data: String) -> Result<String, String> {
        let rpc_url = self
            .rpc_url
            .as_deref()
            .ok_or_else(|| "no RPC endpoint configured".to_string())?;
        counters().inc("onchain.calls");
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": to, "data": data}, "latest"],
        });
        let resp = self
            .client
            .post(rpc_url)
            .json(&body)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("rpc request failed: {}", e))?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("rpc response parse failed: {}", e))?;
        if let Some(err) = value.get("error") {
            return Err(format!("rpc error: {}", err));
        }
        value
            .get("result")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "rpc response missing result".to_string())
    }
}

/// Parse a 0x-prefixed hex word into a big integer.
pub fn parse_uint256(raw: &str) -> Option<BigUint> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    if hex.is_empty() {
        return Some(BigUint::zero());
    }
    BigUint::parse_bytes(hex.as_bytes(), 16)
}

/// Left-pad a 20-byte address to the 32-byte call-data word.
fn pad_address(addr: &str) -> Result<String, String> {
    let hex = addr.strip_prefix("0x").unwrap_or(addr).to_ascii_lowercase();
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("invalid address: {}", addr));
    }
    Ok(format!("{:0>64}", hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint256_parsing() {
        assert_eq!(parse_uint256("0x0"), Some(BigUint::zero()));
        assert_eq!(parse_uint256("0x2ee0"), Some(BigUint::from(12000u32)));
        let large = parse_uint256("0x0000000000000000000000000000000000000000000000056bc75e2d63100000")
            .unwrap();
        assert_eq!(large.to_string(), "100000000000000000000"); // 100 * 10^18
        assert_eq!(parse_uint256("0x"), Some(BigUint::zero()));
        assert_eq!(parse_uint256("0xzz"), None);
    }

    #[test]
    fn address_padding() {
        let padded = pad_address("0xAbC0000000000000000000000000000000000123").unwrap();
        assert_eq!(padded.len(), 64);
        assert!(padded.starts_with("000000000000000000000000abc"));
        assert!(pad_address("0x123").is_err());
    }

    #[tokio::test]
    async fn missing_endpoint_degrades_to_unknown() {
        let reader = ErcReader::with_endpoint(None);
        let meta = reader.token_meta("0x0000000000000000000000000000000000000001").await;
        assert!(meta.supply_unknown);
        assert_eq!(meta.decimals, DEFAULT_DECIMALS);
        assert!(meta.total_supply.is_zero());
    }
}
