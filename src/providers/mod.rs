//! External blockchain-data provider adapters and the fallback façade.
//!
//! One submodule per provider. Every adapter goes through the global rate
//! limiter under its own [`ProviderId`], lowercases addresses, keeps raw
//! smallest-unit balances as `BigUint`, and returns `Err(String)` on any
//! transport or parse problem so callers can degrade instead of crash.
//! [`service::ProviderService`] composes the adapters into fallback chains
//! that never surface an error.

pub mod bitquery;
pub mod client;
pub mod coingecko;
pub mod dexscreener;
pub mod dune;
pub mod etherscan;
pub mod moralis;
pub mod service;
pub mod thegraph;

use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Identity of one external data provider. Doubles as the rate limiter and
/// counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Moralis,
    Bitquery,
    Dexscreener,
    Coingecko,
    Thegraph,
    Dune,
    Etherscan,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Moralis => "moralis",
            ProviderId::Bitquery => "bitquery",
            ProviderId::Dexscreener => "dexscreener",
            ProviderId::Coingecko => "coingecko",
            ProviderId::Thegraph => "thegraph",
            ProviderId::Dune => "dune",
            ProviderId::Etherscan => "etherscan",
        }
    }

    /// Whether this provider can supply holder lists for the holders
    /// pipeline's priority walk.
    pub fn supports_holders(&self) -> bool {
        matches!(self, ProviderId::Moralis | ProviderId::Bitquery)
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moralis" => Ok(ProviderId::Moralis),
            "bitquery" => Ok(ProviderId::Bitquery),
            "dexscreener" => Ok(ProviderId::Dexscreener),
            "coingecko" => Ok(ProviderId::Coingecko),
            "thegraph" => Ok(ProviderId::Thegraph),
            "dune" => Ok(ProviderId::Dune),
            "etherscan" => Ok(ProviderId::Etherscan),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// One holder as a provider returns it: lowercased address and the raw
/// smallest-unit balance. Stays arbitrary precision until the decimals-aware
/// normalization in the holders service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHolder {
    pub address: String,
    pub balance: BigUint,
}

/// Daily time-series point with a fractional value (holders, volume USD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayValue {
    pub date: String,
    pub value: f64,
}

/// Daily time-series point with an event count (transfers, transactions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: u64,
}

/// Ranked top-holder row as the UI consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedHolder {
    pub address: String,
    pub balance: f64,
    pub percentage: f64,
    pub rank: usize,
}

/// One DEX's share of total liquidity, as a rounded integer percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquiditySlice {
    pub name: String,
    pub value: u32,
}

/// Price/market data as returned by a price provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub change_24h: f64,
    pub market_cap: Option<f64>,
    pub volume_24h: f64,
}
