use crate::config::AppConfig;
use crate::models::Pair;

/// Configuration for arbitrage calculations
#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    /// Pairs with less base token than this are ignored.
    pub base_min_reserve: f64,
    /// Multiplier applied on top of the linear trade-size estimate.
    pub delta_coefficient: f64,
    pub min_profit_usd: f64,
    /// Gas assumed when the pool pair has no trade history.
    pub default_gas_units: u64,
}

impl ArbitrageConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            base_min_reserve: cfg.base_min_reserve,
            delta_coefficient: cfg.delta_coefficient,
            min_profit_usd: cfg.min_profit_usd,
            default_gas_units: cfg.default_gas_units,
        }
    }
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            base_min_reserve: 0.0,
            delta_coefficient: 0.4,
            min_profit_usd: 0.0,
            default_gas_units: 300_000,
        }
    }
}

/// Result of pricing a two-pool trade between the cheapest and the most
/// expensive pair, both oriented so that token0 is the base token.
///
/// `cost`, `proceeds` and `profit` are in quote-token units.
#[derive(Debug, Clone)]
pub struct PairEvaluation {
    pub buy: Pair,
    pub sell: Pair,
    /// Base-token units to move.
    pub amount: f64,
    /// Price both pools would settle at.
    pub target_price: f64,
    pub cost: f64,
    pub proceeds: f64,
    pub profit: f64,
}

impl PairEvaluation {
    pub fn is_profitable(&self) -> bool {
        self.profit > 0.0
    }

    /// Profit re-expressed in base-token units.
    pub fn profit_in_base(&self) -> f64 {
        self.profit / self.target_price
    }
}
