//! Configuration loader and application settings.

use crate::dex::Protocol;
use crate::errors::{AppError, Result};
use ethers::types::{Address, H256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Multicall3, deployed at the same address on every major EVM chain.
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// One watched DEX: its factory, the event topic that signals a state change,
/// and a fee for protocols that do not expose one on-chain.
#[derive(Debug, Clone, Deserialize)]
pub struct DexConfig {
    pub name: String,
    pub topic: H256,
    pub factory: Address,
    #[serde(default)]
    pub fee: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcConfig {
    pub http: String,
    pub ws: String,
}

/// Pair used to quote gas (and USD profit), e.g. WETH/USDT.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GasTokenConfig {
    pub base: Address,
    pub quote: Address,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyConfig {
    /// Base token address -> pools the trading contract may borrow it from.
    #[serde(default)]
    pub base_tokens: HashMap<Address, Vec<Address>>,
    #[serde(default)]
    pub gas_token: GasTokenConfig,
}

/// Consolidated application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub net_name: String,
    pub rpcs: RpcConfig,
    pub multicall_address: Address,
    /// Quiet period (ms) after the last log event before a window is processed.
    pub event_waiting_time: u64,
    /// Fallback gas price in native units, used until the node answers.
    pub gas_price: f64,
    pub gas_times: f64,
    pub trader_contract: Option<Address>,
    /// Minimum base-token reserve for a pair to be considered.
    pub base_min_reserve: f64,
    /// Maximum calls per physical batch.
    pub chunk_length: usize,
    /// Maximum batches in flight.
    pub max_concurrent: usize,
    pub debug: bool,
    pub dexs: Vec<DexConfig>,
    pub min_profit_usd: f64,
    /// Multiplier applied on top of the linear trade-size estimate.
    pub delta_coefficient: f64,
    /// Gas assumed for a trade when no history exists for the pool pair.
    pub default_gas_units: u64,
    pub blacklist_dir: PathBuf,
    pub strategies: StrategyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            net_name: String::new(),
            rpcs: RpcConfig::default(),
            multicall_address: DEFAULT_MULTICALL_ADDRESS.parse().unwrap_or_default(),
            event_waiting_time: 200,
            gas_price: 2e-9,
            gas_times: 1.0,
            trader_contract: None,
            base_min_reserve: 0.0,
            chunk_length: 100,
            max_concurrent: 4,
            debug: false,
            dexs: Vec::new(),
            min_profit_usd: 0.0,
            delta_coefficient: 0.4,
            default_gas_units: 300_000,
            blacklist_dir: PathBuf::from("."),
            strategies: StrategyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the JSON file named by `LISTENER_CONFIG`
    /// (default `config.json`), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LISTENER_CONFIG").unwrap_or_else(|_| "config.json".into());
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(http) = std::env::var("RPC_HTTP_URL") {
            self.rpcs.http = http;
        }
        if let Ok(ws) = std::env::var("RPC_WS_URL") {
            self.rpcs.ws = ws;
        }
        if let Ok(min) = std::env::var("MIN_PROFIT_USD") {
            self.min_profit_usd = min.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dexs.is_empty() {
            return Err(AppError::Config("no dexs configured".into()));
        }
        if self.chunk_length == 0 || self.max_concurrent == 0 {
            return Err(AppError::Config(
                "chunk_length and max_concurrent must be positive".into(),
            ));
        }
        Url::parse(&self.rpcs.http)?;
        Url::parse(&self.rpcs.ws)?;
        for dex in &self.dexs {
            if Protocol::from_name(&dex.name).is_none() {
                return Err(AppError::Config(format!("unsupported dex '{}'", dex.name)));
            }
        }
        if let Some((base, _)) = self.strategies.base_tokens.iter().find(|(_, pools)| pools.is_empty()) {
            return Err(AppError::Config(format!("base token {base:?} has no borrow pools")));
        }
        Ok(())
    }

    pub fn factories(&self) -> Vec<Address> {
        self.dexs.iter().map(|d| d.factory).collect()
    }

    pub fn topics(&self) -> Vec<H256> {
        let mut topics: Vec<H256> = self.dexs.iter().map(|d| d.topic).collect();
        topics.sort();
        topics.dedup();
        topics
    }
}
