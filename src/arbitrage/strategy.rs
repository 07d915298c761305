//! Pluggable arbitrage strategies over the priced pairs in the store.

use super::evaluator::{calculate_gas_cost_usd, evaluate_pairs, pick_borrow_pool, pick_gas_units};
use super::types::{ArbitrageConfig, PairEvaluation};
use crate::config::{AppConfig, GasTokenConfig};
use crate::errors::Result;
use crate::models::{ArbitrageCandidate, Pool};
use crate::store::Store;
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Chain conditions a strategy evaluates against, captured once per window.
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    pub block_number: u64,
    /// Native units per gas, already scaled by `gas_times`.
    pub gas_price: f64,
    /// Trader contract balance per base token, in token units.
    pub inventory: HashMap<Address, f64>,
}

#[async_trait]
pub trait ArbitrageStrategy: Send + Sync {
    /// Tokens the strategy trades against; inventory is read for these.
    fn base_tokens(&self) -> Vec<Address>;

    /// Decide whether the market `pool` belongs to has a trade worth sending.
    async fn calc_arbitrage(&self, pool: &Pool, market: &MarketContext) -> Result<Option<ArbitrageCandidate>>;
}

/// Two-pool arbitrage: buy the base token's counterpart on the cheapest
/// pool and sell it on the most expensive one.
pub struct TwoPoolStrategy {
    config: ArbitrageConfig,
    store: Arc<dyn Store>,
    /// Base token -> pools the trader contract can flash-borrow it from.
    borrow_pools: HashMap<Address, Vec<Address>>,
    gas_token: GasTokenConfig,
}

impl TwoPoolStrategy {
    pub fn new(config: ArbitrageConfig, store: Arc<dyn Store>, app: &AppConfig) -> Self {
        Self {
            config,
            store,
            borrow_pools: app.strategies.base_tokens.clone(),
            gas_token: app.strategies.gas_token,
        }
    }

    /// The configured base token of a market, preferring token0.
    pub fn base_token_of(&self, token0: Address, token1: Address) -> Option<Address> {
        [token0, token1].into_iter().find(|t| self.borrow_pools.contains_key(t))
    }

    /// Price of `base` in `quote` from the deepest stored pool trading both.
    async fn reference_price(&self, base: Address, quote: Address) -> Result<Option<f64>> {
        let pairs = self.store.get_pairs_by_tokens(&[base, quote]).await?;
        Ok(pairs
            .into_iter()
            .map(|p| p.oriented_to(base))
            .filter(|p| p.token0 == base && p.price.is_finite() && p.price > 0.0)
            .max_by(|a, b| a.reserve0.total_cmp(&b.reserve0))
            .map(|p| p.price))
    }

    async fn is_usd(&self, token: Address) -> Result<bool> {
        Ok(self
            .store
            .get_token(token)
            .await?
            .is_some_and(|t| t.symbol.to_uppercase().contains("USD")))
    }

    /// Convert a profit in base-token units into USD, quoting through the
    /// gas token's quote currency.
    async fn base_to_usd(&self, base: Address, amount: f64) -> Result<Option<f64>> {
        if self.is_usd(base).await? {
            return Ok(Some(amount));
        }
        let GasTokenConfig { base: gas_base, quote: gas_quote } = self.gas_token;
        if base == gas_quote {
            return Ok(Some(amount));
        }
        let price = if base == gas_base {
            self.reference_price(gas_base, gas_quote).await?
        } else {
            self.reference_price(base, gas_quote).await?
        };
        Ok(price.map(|p| amount * p))
    }

    async fn borrow_route(&self, eval: &PairEvaluation, base: Address) -> Result<Option<(Address, u8)>> {
        let Some(configured) = self.borrow_pools.get(&base) else {
            return Ok(None);
        };
        let pools = self.store.get_simple_pools(configured).await?;
        Ok(pick_borrow_pool(&pools, eval.buy.pool, eval.sell.pool, base)
            .or_else(|| configured.first().map(|a| (*a, 0))))
    }
}

#[async_trait]
impl ArbitrageStrategy for TwoPoolStrategy {
    fn base_tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.borrow_pools.keys().copied().collect();
        tokens.sort();
        tokens
    }

    async fn calc_arbitrage(&self, pool: &Pool, market: &MarketContext) -> Result<Option<ArbitrageCandidate>> {
        let Some(base) = self.base_token_of(pool.token0.address, pool.token1.address) else {
            debug!(pool = ?pool.address, symbol = %pool.symbol(), "[OPP] no base token in pair");
            return Ok(None);
        };

        let pairs = self
            .store
            .get_pairs_by_tokens(&[pool.token0.address, pool.token1.address])
            .await?;
        let Some(eval) = evaluate_pairs(pairs, base, &self.config) else {
            return Ok(None);
        };
        if !eval.is_profitable() {
            return Ok(None);
        }

        let Some(profit_usd) = self.base_to_usd(base, eval.profit_in_base()).await? else {
            debug!(base = ?base, "[OPP] no usd reference price for base token");
            return Ok(None);
        };
        let Some(native_usd) = self
            .reference_price(self.gas_token.base, self.gas_token.quote)
            .await?
        else {
            debug!(gas_token = ?self.gas_token.base, "[OPP] no gas reference price");
            return Ok(None);
        };
        let stats = self.store.get_gas_stats(eval.buy.pool, eval.sell.pool).await?;
        let inventory = market.inventory.get(&base).copied().unwrap_or(0.0);
        let gas_units = pick_gas_units(stats, eval.amount, inventory, self.config.default_gas_units);
        let gas_usd = calculate_gas_cost_usd(gas_units, market.gas_price, native_usd);
        let net_usd = profit_usd - gas_usd;
        if net_usd < self.config.min_profit_usd {
            debug!(
                symbol = %eval.buy.symbol,
                profit_usd,
                gas_usd,
                min_profit_usd = self.config.min_profit_usd,
                "[OPP] below threshold"
            );
            return Ok(None);
        }

        let Some((borrow_pool, position)) = self.borrow_route(&eval, base).await? else {
            debug!(base = ?base, "[OPP] no borrow pool for base token");
            return Ok(None);
        };
        info!(
            symbol = %eval.buy.symbol,
            profit = eval.profit,
            profit_usd = net_usd,
            amount = eval.amount,
            buy_price = eval.buy.price,
            sell_price = eval.sell.price,
            gas_units,
            "[OPP] arbitrage found"
        );
        Ok(Some(ArbitrageCandidate {
            amount: eval.amount,
            profit_usd: net_usd,
            block_number: market.block_number,
            gas_price: market.gas_price,
            borrow_pool,
            position,
            base_token: base,
            buy_pool: eval.buy,
            sell_pool: eval.sell,
        }))
    }
}
