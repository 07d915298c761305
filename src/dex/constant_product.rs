use crate::dex::calc::{price_from_reserves, scaled_fee};
use crate::errors::Result;
use crate::models::Pool;
use crate::multicall::{Call, function};
use crate::utils::u256_to_bigint;
use ethers::abi::{Function, Token};
use num_bigint::BigInt;
use std::sync::Arc;

/// Where a constant-product pool's fee comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSource {
    /// The configured constant; no extra call.
    Configured,
    /// Pool `swapFee()` in thousandths (Biswap). Read before the reserves.
    PoolSwapFee,
    /// Pool `totalFee()` in thousandths (ShibaSwap).
    PoolTotalFee,
    /// Factory `totalFeeBasisPoint()` (DefiSwap).
    FactoryBasisPoints,
    /// Factory `getPairFees(pool)` in basis points (MDEX).
    FactoryPairFees,
}

/// `getReserves()`-priced pools.
#[derive(Debug, Clone)]
pub struct ConstantProduct {
    fee_source: FeeSource,
    configured_fee: f64,
    get_reserves: Arc<Function>,
    fee_call: Option<Arc<Function>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub reserve0: BigInt,
    pub reserve1: BigInt,
    pub price: f64,
    pub fee: f64,
}

impl ConstantProduct {
    pub fn new(fee_source: FeeSource, configured_fee: f64) -> Result<Self> {
        let fee_call = match fee_source {
            FeeSource::Configured => None,
            FeeSource::PoolSwapFee => Some(function("function swapFee() view returns (uint32)")?),
            FeeSource::PoolTotalFee => Some(function("function totalFee() view returns (uint256)")?),
            FeeSource::FactoryBasisPoints => {
                Some(function("function totalFeeBasisPoint() view returns (uint256)")?)
            }
            FeeSource::FactoryPairFees => {
                Some(function("function getPairFees(address) view returns (uint256)")?)
            }
        };
        Ok(Self {
            fee_source,
            configured_fee,
            get_reserves: function(
                "function getReserves() view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)",
            )?,
            fee_call,
        })
    }

    pub fn price_call_count(&self) -> usize {
        if self.fee_call.is_some() { 2 } else { 1 }
    }

    fn reserves_index(&self) -> usize {
        match self.fee_source {
            FeeSource::PoolSwapFee => 1,
            _ => 0,
        }
    }

    pub fn create_price_calls(&self, pool: &Pool) -> Vec<Call> {
        let tag = format!("{:?}", pool.address);
        let reserves = Call::new(pool.address, self.get_reserves.clone(), vec![]).named(tag.clone());
        let Some(fee_fn) = self.fee_call.clone() else {
            return vec![reserves];
        };
        let fee = match self.fee_source {
            FeeSource::FactoryBasisPoints => Call::new(pool.factory, fee_fn, vec![]),
            FeeSource::FactoryPairFees => {
                Call::new(pool.factory, fee_fn, vec![Token::Address(pool.address)])
            }
            _ => Call::new(pool.address, fee_fn, vec![]),
        }
        .named(tag);
        if self.reserves_index() == 0 {
            vec![reserves, fee]
        } else {
            vec![fee, reserves]
        }
    }

    fn fee(&self, calls: &[Call]) -> Option<f64> {
        let fee_index = 1 - self.reserves_index();
        let raw = || calls.get(fee_index)?.uint(0).map(|v| v.low_u64());
        Some(match self.fee_source {
            FeeSource::Configured => self.configured_fee,
            FeeSource::PoolSwapFee => scaled_fee(raw()?, 1e-3, 3),
            FeeSource::PoolTotalFee => scaled_fee(raw()?, 1e-3, 6),
            FeeSource::FactoryBasisPoints | FeeSource::FactoryPairFees => scaled_fee(raw()?, 1e-4, 6),
        })
    }

    pub fn read(&self, calls: &[Call], pool: &Pool) -> Option<Reading> {
        if calls.len() < self.price_call_count() || calls.iter().any(Call::failed) {
            return None;
        }
        let reserves = &calls[self.reserves_index()];
        let reserve0 = u256_to_bigint(reserves.uint(0)?);
        let reserve1 = u256_to_bigint(reserves.uint(1)?);
        let price = price_from_reserves(&reserve0, &reserve1, pool.token0.decimals, pool.token1.decimals)?;
        Some(Reading { reserve0, reserve1, price, fee: self.fee(calls)? })
    }
}
