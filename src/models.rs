//! Shared data structures used throughout the application.

use bigdecimal::BigDecimal;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// ERC-20 metadata resolved during onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Raw on-chain supply scaled down by `10^decimals`.
    pub total_supply: BigDecimal,
}

/// Address-only projection of a pool, as persisted by onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimplePool {
    pub factory: Address,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
}

impl SimplePool {
    /// True when both pools trade the same two tokens, in either order.
    pub fn same_market(&self, other: &SimplePool) -> bool {
        (self.token0 == other.token0 && self.token1 == other.token1)
            || (self.token0 == other.token1 && self.token1 == other.token0)
    }
}

/// Pool with its token metadata joined in. Token order is the on-chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub factory: Address,
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
}

impl Pool {
    pub fn simple(&self) -> SimplePool {
        SimplePool {
            factory: self.factory,
            address: self.address,
            token0: self.token0.address,
            token1: self.token1.address,
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }
}

/// Current priced snapshot of one pool. One row per pool, overwritten on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub pool: Address,
    pub symbol: String,
    pub token0: Address,
    pub token1: Address,
    /// token1 per token0, decimal-normalized.
    pub price: f64,
    pub reserve0: f64,
    pub reserve1: f64,
    pub block_number: u64,
    pub dex_name: String,
    /// Fractional fee, e.g. 0.003.
    pub fee: f64,
    pub update_times: u32,
}

impl Pair {
    /// Re-express the pair so that `base` is token0. No-op if it already is.
    pub fn oriented_to(mut self, base: Address) -> Self {
        if self.token0 != base {
            std::mem::swap(&mut self.token0, &mut self.token1);
            std::mem::swap(&mut self.reserve0, &mut self.reserve1);
            self.price = if self.price != 0.0 { 1.0 / self.price } else { 0.0 };
        }
        self
    }
}

/// A two-pool trade the detector considers profitable. Never persisted.
#[derive(Debug, Clone)]
pub struct ArbitrageCandidate {
    pub buy_pool: Pair,
    pub sell_pool: Pair,
    /// Trade size in base-token units.
    pub amount: f64,
    pub profit_usd: f64,
    pub block_number: u64,
    /// Gas price in native units (already multiplied by `gas_times`).
    pub gas_price: f64,
    pub borrow_pool: Address,
    pub position: u8,
    pub base_token: Address,
}

/// Outcome of a submitted trade, persisted so repeated failures can be escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx: String,
    pub ok: bool,
    pub confirm: bool,
    pub buy_pool: Address,
    pub sell_pool: Address,
    pub base_token: Address,
    pub event_block: u64,
    pub use_gas: u64,
    pub created_at: SystemTime,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(token0: Address, token1: Address, price: f64) -> Pair {
        Pair {
            pool: Address::repeat_byte(9),
            symbol: "A/B".into(),
            token0,
            token1,
            price,
            reserve0: 10.0,
            reserve1: 20_000.0,
            block_number: 1,
            dex_name: "UniswapV2".into(),
            fee: 0.003,
            update_times: 0,
        }
    }

    #[test]
    fn orienting_swaps_tokens_reserves_and_inverts_price() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let p = pair(a, b, 2000.0).oriented_to(b);
        assert_eq!(p.token0, b);
        assert_eq!(p.token1, a);
        assert_eq!(p.reserve0, 20_000.0);
        assert_eq!(p.reserve1, 10.0);
        assert!((p.price - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn orienting_to_current_base_is_noop() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let p = pair(a, b, 2000.0);
        assert_eq!(p.clone().oriented_to(a), p);
    }

    #[test]
    fn same_market_ignores_token_order() {
        let x = SimplePool {
            factory: Address::zero(),
            address: Address::repeat_byte(3),
            token0: Address::repeat_byte(1),
            token1: Address::repeat_byte(2),
        };
        let y = SimplePool {
            address: Address::repeat_byte(4),
            token0: x.token1,
            token1: x.token0,
            ..x
        };
        assert!(x.same_market(&y));
    }
}
