//! DEX price engine: per-protocol price calls and their conversion into
//! priced pairs.

pub mod calc;
pub mod concentrated;
pub mod constant_product;
pub mod tick_math;

use crate::config::DexConfig;
use crate::errors::Result;
use crate::models::{Pair, Pool};
use crate::multicall::Call;
use crate::utils::raw_to_f64;
use concentrated::{Concentrated, StateLayout};
use constant_product::{ConstantProduct, FeeSource};
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Every supported DEX, by configured name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    UniswapV2,
    SushiSwap,
    PancakeV2,
    ApeSwap,
    Biswap,
    ShibaSwap,
    DefiSwap,
    Mdex,
    UniswapV3,
    SushiSwapV3,
    PancakeV3,
    Aerodrome,
    SolidlyV3,
    Thena,
}

impl Protocol {
    pub fn from_name(name: &str) -> Option<Protocol> {
        Some(match name {
            "UniswapV2" => Protocol::UniswapV2,
            "SushiSwap" => Protocol::SushiSwap,
            "PancakeV2" => Protocol::PancakeV2,
            "ApeSwap" => Protocol::ApeSwap,
            "Biswap" => Protocol::Biswap,
            "ShibaSwap" => Protocol::ShibaSwap,
            "DefiSwap" => Protocol::DefiSwap,
            "MDEX" => Protocol::Mdex,
            "UniswapV3" => Protocol::UniswapV3,
            "SushiSwapV3" => Protocol::SushiSwapV3,
            "PancakeV3" => Protocol::PancakeV3,
            "Aerodrome" => Protocol::Aerodrome,
            "SolidlyV3" => Protocol::SolidlyV3,
            "Thena" => Protocol::Thena,
            _ => return None,
        })
    }

    /// Pool type id the trading contract's router expects.
    pub fn pool_type(self) -> u8 {
        match self {
            Protocol::Thena => 4,
            Protocol::SolidlyV3 => 5,
            _ => 2,
        }
    }

    fn model(self, configured_fee: f64) -> Result<PriceModel> {
        let cp = |source| ConstantProduct::new(source, configured_fee).map(PriceModel::ConstantProduct);
        let cl = |layout| Concentrated::new(layout).map(PriceModel::Concentrated);
        match self {
            Protocol::UniswapV2 | Protocol::SushiSwap | Protocol::PancakeV2 | Protocol::ApeSwap => {
                cp(FeeSource::Configured)
            }
            Protocol::Biswap => cp(FeeSource::PoolSwapFee),
            Protocol::ShibaSwap => cp(FeeSource::PoolTotalFee),
            Protocol::DefiSwap => cp(FeeSource::FactoryBasisPoints),
            Protocol::Mdex => cp(FeeSource::FactoryPairFees),
            Protocol::UniswapV3 | Protocol::SushiSwapV3 => cl(StateLayout::UniswapV3),
            Protocol::PancakeV3 => cl(StateLayout::PancakeV3),
            Protocol::Aerodrome => cl(StateLayout::Aerodrome),
            Protocol::SolidlyV3 => cl(StateLayout::SolidlyV3),
            Protocol::Thena => cl(StateLayout::Algebra),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PriceModel {
    ConstantProduct(ConstantProduct),
    Concentrated(Concentrated),
}

/// One configured DEX and its price-call contract.
#[derive(Debug, Clone)]
pub struct Dex {
    pub name: String,
    pub protocol: Protocol,
    pub topic: H256,
    pub factory: Address,
    model: PriceModel,
}

impl Dex {
    pub fn from_config(cfg: &DexConfig) -> Result<Self> {
        let protocol = Protocol::from_name(&cfg.name).ok_or_else(|| {
            crate::errors::AppError::Config(format!("unsupported dex '{}'", cfg.name))
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            protocol,
            topic: cfg.topic,
            factory: cfg.factory,
            model: protocol.model(cfg.fee)?,
        })
    }

    /// How many consecutive calls one pool's snapshot consumes.
    pub fn price_call_count(&self) -> usize {
        match &self.model {
            PriceModel::ConstantProduct(m) => m.price_call_count(),
            PriceModel::Concentrated(m) => m.price_call_count(),
        }
    }

    pub fn create_price_calls(&self, pool: &Pool) -> Vec<Call> {
        match &self.model {
            PriceModel::ConstantProduct(m) => m.create_price_calls(pool),
            PriceModel::Concentrated(m) => m.create_price_calls(pool),
        }
    }

    /// Price a pool from its window of calls. `None` if any call failed or
    /// the state cannot be priced.
    pub fn calc_price(&self, calls: &[Call], block_number: u64, pool: &Pool) -> Option<Pair> {
        let (price, reserve0, reserve1, fee) = match &self.model {
            PriceModel::ConstantProduct(m) => {
                let r = m.read(calls, pool)?;
                (r.price, r.reserve0, r.reserve1, r.fee)
            }
            PriceModel::Concentrated(m) => {
                let r = m.read(calls, pool)?;
                (r.price, r.reserve0, r.reserve1, r.snapshot.fee)
            }
        };
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let pair = Pair {
            pool: pool.address,
            symbol: pool.symbol(),
            token0: pool.token0.address,
            token1: pool.token1.address,
            price,
            reserve0: raw_to_f64(&reserve0, pool.token0.decimals),
            reserve1: raw_to_f64(&reserve1, pool.token1.decimals),
            block_number,
            dex_name: self.name.clone(),
            fee,
            update_times: 0,
        };
        debug!(
            pool = ?pool.address,
            symbol = %pair.symbol,
            price = pair.price,
            reserve0 = pair.reserve0,
            reserve1 = pair.reserve1,
            block = block_number,
            dex = %self.name,
            "[PRICE] pair priced"
        );
        Some(pair)
    }
}

/// Configured DEXes, looked up by the factory that deployed a pool.
#[derive(Debug, Clone, Default)]
pub struct DexRegistry {
    by_factory: HashMap<Address, Arc<Dex>>,
}

impl DexRegistry {
    pub fn from_config(dexs: &[DexConfig]) -> Result<Self> {
        let mut by_factory = HashMap::new();
        for cfg in dexs {
            by_factory.insert(cfg.factory, Arc::new(Dex::from_config(cfg)?));
        }
        Ok(Self { by_factory })
    }

    pub fn by_factory(&self, factory: &Address) -> Option<&Arc<Dex>> {
        self.by_factory.get(factory)
    }

    pub fn factories(&self) -> impl Iterator<Item = &Address> {
        self.by_factory.keys()
    }
}
