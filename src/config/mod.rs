//! Environment-driven configuration.
//!
//! All credentials and tunables come from environment variables, loaded once
//! at startup into a global `OnceCell<RwLock<AppConfig>>`. Absence of any one
//! provider credential degrades that provider only, never the whole system.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::OnceCell;

use crate::logger::{self, LogTag};
use crate::providers::ProviderId;

/// Which backing store the circuit breaker and counters use. Chosen once at
/// process start; mixing instance-local and shared state would make the
/// breaker ineffective at the fleet level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedStoreConfig {
    Memory,
    Sqlite { path: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub moralis_api_key: Option<String>,
    pub bitquery_api_key: Option<String>,
    pub dune_api_key: Option<String>,
    pub etherscan_api_key: Option<String>,

    /// EVM JSON-RPC endpoint for contract reads. Absence degrades on-chain
    /// metadata lookups to defaults, never blocks.
    pub rpc_url: Option<String>,

    /// Provider priority for the holders pipeline, parsed once at load.
    pub holders_priority: Vec<ProviderId>,

    /// chain name -> list of subgraph URLs to aggregate volume across.
    pub subgraphs: HashMap<String, Vec<String>>,

    /// Path to the snapshot SQLite database.
    pub snapshot_db_path: String,

    pub shared_store: SharedStoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            moralis_api_key: None,
            bitquery_api_key: None,
            dune_api_key: None,
            etherscan_api_key: None,
            rpc_url: None,
            holders_priority: vec![ProviderId::Moralis],
            subgraphs: HashMap::new(),
            snapshot_db_path: "data/chainboard.db".to_string(),
            shared_store: SharedStoreConfig::Memory,
        }
    }
}

impl AppConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        let holders_priority = parse_provider_priority(
            std::env::var("PROVIDERS_PRIORITY_HOLDERS")
                .unwrap_or_else(|_| "moralis".to_string())
                .as_str(),
        );

        let shared_store = match std::env::var("SHARED_STORE_PATH") {
            Ok(path) if !path.trim().is_empty() => SharedStoreConfig::Sqlite { path },
            _ => SharedStoreConfig::Memory,
        };

        Self {
            moralis_api_key: non_empty_env("MORALIS_API_KEY"),
            bitquery_api_key: non_empty_env("BITQUERY_API_KEY"),
            dune_api_key: non_empty_env("DUNE_API_KEY"),
            etherscan_api_key: non_empty_env("ETHERSCAN_API_KEY"),
            rpc_url: non_empty_env("RPC_URL"),
            holders_priority,
            subgraphs: parse_subgraphs(non_empty_env("SUBGRAPH_URLS").as_deref()),
            snapshot_db_path: std::env::var("SNAPSHOT_DB_PATH")
                .unwrap_or_else(|_| "data/chainboard.db".to_string()),
            shared_store,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma-separated provider priority list into a validated ordered
/// list. Unknown or non-holder-capable entries are dropped with a warning.
pub fn parse_provider_priority(raw: &str) -> Vec<ProviderId> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let name = part.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        match name.parse::<ProviderId>() {
            Ok(id) if id.supports_holders() => {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
            Ok(id) => {
                logger::warning(
                    LogTag::Config,
                    &format!("provider '{}' cannot supply holder lists, skipping", id.as_str()),
                );
            }
            Err(_) => {
                logger::warning(LogTag::Config, &format!("unknown provider '{}', skipping", name));
            }
        }
    }
    if out.is_empty() {
        out.push(ProviderId::Moralis);
    }
    out
}

/// Parse `SUBGRAPH_URLS` of the form `chain=url1|url2;chain2=url3`.
fn parse_subgraphs(raw: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    let Some(raw) = raw else { return map };
    for entry in raw.split(';') {
        let Some((chain, urls)) = entry.split_once('=') else { continue };
        let urls: Vec<String> = urls
            .split('|')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if !urls.is_empty() {
            map.insert(chain.trim().to_ascii_lowercase(), urls);
        }
    }
    map
}

/// Global configuration instance.
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// Load configuration from the environment and initialize the global CONFIG.
/// Should be called once at startup; later calls are ignored.
pub fn load_config() {
    let config = AppConfig::from_env();
    if CONFIG.set(RwLock::new(config)).is_ok() {
        logger::info(LogTag::Config, "configuration loaded from environment");
    }
}

/// Replace the global configuration (tests and tooling).
pub fn set_config(config: AppConfig) {
    match CONFIG.get() {
        Some(lock) => {
            *lock.write().expect("config lock poisoned") = config;
        }
        None => {
            let _ = CONFIG.set(RwLock::new(config));
        }
    }
}

/// Get a clone of the current configuration.
pub fn get_config_clone() -> AppConfig {
    CONFIG
        .get_or_init(|| RwLock::new(AppConfig::from_env()))
        .read()
        .expect("config lock poisoned")
        .clone()
}
