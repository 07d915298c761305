use crate::dex::calc::{price_from_sqrt_price, reserves_in_range, scaled_fee};
use crate::errors::Result;
use crate::models::Pool;
use crate::multicall::{Call, function};
use crate::utils::u256_to_bigint;
use ethers::abi::Function;
use ethers::types::U256;
use num_bigint::BigInt;
use std::sync::Arc;
use tracing::debug;

/// How a concentrated-liquidity pool exposes its price state and fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateLayout {
    /// `fee()`, `tickSpacing()`, `slot0()` with a `uint8 feeProtocol`, `liquidity()`.
    UniswapV3,
    /// As Uniswap V3 but `slot0.feeProtocol` is a `uint32`.
    PancakeV3,
    /// Slipstream: `slot0()` has no `feeProtocol`.
    Aerodrome,
    /// `slot0()` = (sqrtPriceX96, tick, fee, unlocked), `tickSpacing()`, `liquidity()`.
    SolidlyV3,
    /// Algebra `globalState()` = (price, tick, fee, ...), `tickSpacing()`, `liquidity()`.
    Algebra,
}

impl StateLayout {
    fn state_signature(self) -> &'static str {
        match self {
            StateLayout::UniswapV3 => {
                "function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)"
            }
            StateLayout::PancakeV3 => {
                "function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint32 feeProtocol, bool unlocked)"
            }
            StateLayout::Aerodrome => {
                "function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, bool unlocked)"
            }
            StateLayout::SolidlyV3 => {
                "function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint24 fee, bool unlocked)"
            }
            StateLayout::Algebra => {
                "function globalState() view returns (uint160 price, int24 tick, uint16 fee, uint16 timepointIndex, uint8 communityFeeToken0, uint8 communityFeeToken1, bool unlocked)"
            }
        }
    }

    /// Fee lives inside the state tuple rather than behind `fee()`.
    fn fee_in_state(self) -> bool {
        matches!(self, StateLayout::SolidlyV3 | StateLayout::Algebra)
    }
}

/// Decoded price state of one pool, all read at the same block.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub tick_spacing: i32,
    pub liquidity: U256,
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub snapshot: Snapshot,
    pub price: f64,
    pub reserve0: BigInt,
    pub reserve1: BigInt,
}

#[derive(Debug, Clone)]
pub struct Concentrated {
    layout: StateLayout,
    fee: Arc<Function>,
    tick_spacing: Arc<Function>,
    state: Arc<Function>,
    liquidity: Arc<Function>,
}

impl Concentrated {
    pub fn new(layout: StateLayout) -> Result<Self> {
        Ok(Self {
            layout,
            fee: function("function fee() view returns (uint24)")?,
            tick_spacing: function("function tickSpacing() view returns (int24)")?,
            state: function(layout.state_signature())?,
            liquidity: function("function liquidity() view returns (uint128)")?,
        })
    }

    pub fn price_call_count(&self) -> usize {
        if self.layout.fee_in_state() { 3 } else { 4 }
    }

    pub fn create_price_calls(&self, pool: &Pool) -> Vec<Call> {
        let tag = format!("{:?}", pool.address);
        let call = |f: &Arc<Function>| Call::new(pool.address, f.clone(), vec![]).named(tag.clone());
        if self.layout.fee_in_state() {
            vec![call(&self.state), call(&self.tick_spacing), call(&self.liquidity)]
        } else {
            vec![
                call(&self.fee),
                call(&self.tick_spacing),
                call(&self.state),
                call(&self.liquidity),
            ]
        }
    }

    pub fn snapshot(&self, calls: &[Call]) -> Option<Snapshot> {
        if calls.len() < self.price_call_count() || calls.iter().any(Call::failed) {
            return None;
        }
        let (state, spacing, liquidity, fee_raw) = if self.layout.fee_in_state() {
            let fee = calls[0].uint(2)?.low_u64();
            (&calls[0], &calls[1], &calls[2], fee)
        } else {
            (&calls[2], &calls[1], &calls[3], calls[0].uint(0)?.low_u64())
        };
        Some(Snapshot {
            sqrt_price_x96: state.uint(0)?,
            tick: state.int(1)?.low_i32(),
            tick_spacing: spacing.int(0)?.low_i32(),
            liquidity: liquidity.uint(0)?,
            fee: scaled_fee(fee_raw, 1e-6, 6),
        })
    }

    pub fn read(&self, calls: &[Call], pool: &Pool) -> Option<Reading> {
        let snapshot = self.snapshot(calls)?;
        let price = price_from_sqrt_price(
            snapshot.sqrt_price_x96,
            pool.token0.decimals,
            pool.token1.decimals,
        );
        let liquidity = u256_to_bigint(snapshot.liquidity);
        let (reserve0, reserve1) = match reserves_in_range(
            snapshot.tick,
            snapshot.tick_spacing,
            &liquidity,
            snapshot.sqrt_price_x96,
        ) {
            Ok(r) => r,
            Err(e) => {
                debug!(pool = ?pool.address, error = %e, "[PRICE] cannot estimate reserves");
                return None;
            }
        };
        Some(Reading { snapshot, price, reserve0, reserve1 })
    }
}
