use super::types::{ArbitrageConfig, PairEvaluation};
use crate::models::{Pair, SimplePool};
use ethers::types::Address;
use tracing::debug;

/// Orient every pair to `base`, drop the ones below the reserve floor and
/// sort the rest by price, cheapest first.
pub fn canonicalize(pairs: Vec<Pair>, base: Address, min_reserve: f64) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = pairs
        .into_iter()
        .map(|p| p.oriented_to(base))
        .filter(|p| p.token0 == base && p.reserve0 >= min_reserve)
        .filter(|p| p.price.is_finite() && p.price > 0.0)
        .collect();
    pairs.sort_by(|a, b| a.price.total_cmp(&b.price));
    pairs
}

/// Buy on the cheapest pair, sell on the most expensive one, and size the
/// trade so both move halfway towards their average price.
pub fn evaluate_pairs(pairs: Vec<Pair>, base: Address, config: &ArbitrageConfig) -> Option<PairEvaluation> {
    let mut pairs = canonicalize(pairs, base, config.base_min_reserve);
    if pairs.len() < 2 {
        return None;
    }
    let sell = pairs.pop()?;
    let buy = pairs.swap_remove(0);
    evaluate_two(buy, sell, config.delta_coefficient)
}

/// Price one trade between two base-oriented pairs. `None` when the
/// estimated size is not positive.
pub fn evaluate_two(buy: Pair, sell: Pair, delta_coefficient: f64) -> Option<PairEvaluation> {
    let target_price = (sell.price + buy.price) / 2.0;
    if target_price <= 0.0 {
        return None;
    }
    let mut amount = (sell.price - target_price) * sell.reserve0.min(buy.reserve0) / target_price / 2.0;
    if amount <= 0.0 || !amount.is_finite() {
        return None;
    }
    amount += amount * delta_coefficient;

    let cost = ((buy.price + target_price) / 2.0) * amount * (1.0 + buy.fee);
    let proceeds = ((sell.price + target_price) / 2.0) * amount * (1.0 - sell.fee);
    let profit = proceeds - cost;
    debug!(
        symbol = %buy.symbol,
        cost,
        proceeds,
        profit,
        amount,
        buy_price = buy.price,
        sell_price = sell.price,
        buy_fee = buy.fee,
        sell_fee = sell.fee,
        "[OPP] evaluated pair"
    );
    Some(PairEvaluation {
        buy,
        sell,
        amount,
        target_price,
        cost,
        proceeds,
        profit,
    })
}

/// Gas in USD = gas units * native gas price * USD per native token.
pub fn calculate_gas_cost_usd(gas_units: u64, gas_price_native: f64, native_usd_price: f64) -> f64 {
    gas_units as f64 * gas_price_native * native_usd_price
}

/// Historical gas for the pool pair: the minimum when the trade fits in
/// inventory (no borrow), the maximum otherwise. `default_units` without
/// history.
pub fn pick_gas_units(stats: (u64, u64), amount: f64, inventory: f64, default_units: u64) -> u64 {
    let (min, max) = stats;
    if min == 0 || max == 0 {
        return default_units;
    }
    if amount <= inventory { min } else { max }
}

/// First configured borrow pool not involved in the trade; position is the
/// base token's index in that pool.
pub fn pick_borrow_pool(
    borrow_pools: &[SimplePool],
    buy_pool: Address,
    sell_pool: Address,
    base: Address,
) -> Option<(Address, u8)> {
    borrow_pools
        .iter()
        .find(|bp| bp.address != buy_pool && bp.address != sell_pool)
        .map(|bp| (bp.address, if bp.token0 == base { 0 } else { 1 }))
        .or_else(|| borrow_pools.first().map(|bp| (bp.address, 0)))
}
