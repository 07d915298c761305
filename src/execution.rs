//! Hand-off of arbitrage candidates to whatever sends the transaction.

use crate::dex::Protocol;
use crate::errors::Result;
use crate::models::{ArbitrageCandidate, TransactionRecord};
use crate::onboarding::Blacklist;
use crate::store::Store;
use async_trait::async_trait;
use ethers::types::Address;
use std::time::SystemTime;
use tracing::{info, warn};

/// Arguments for the trader contract's swap entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParams {
    pub buy_pool: Address,
    pub sell_pool: Address,
    pub amount: f64,
    /// Last block the trade may land in.
    pub deadline: u64,
    /// Fees in basis points.
    pub buy_fee: u16,
    pub sell_fee: u16,
    pub buy_pool_type: u8,
    pub sell_pool_type: u8,
    pub gas_price: f64,
    pub borrow: Address,
    pub base_token: Address,
    pub position: u8,
}

impl SwapParams {
    pub fn from_candidate(c: &ArbitrageCandidate) -> Self {
        let pool_type = |dex: &str| Protocol::from_name(dex).map_or(2, Protocol::pool_type);
        Self {
            buy_pool: c.buy_pool.pool,
            sell_pool: c.sell_pool.pool,
            amount: c.amount,
            deadline: c.block_number + 1,
            buy_fee: (c.buy_pool.fee * 1e4).round() as u16,
            sell_fee: (c.sell_pool.fee * 1e4).round() as u16,
            buy_pool_type: pool_type(&c.buy_pool.dex_name),
            sell_pool_type: pool_type(&c.sell_pool.dex_name),
            gas_price: c.gas_price,
            borrow: c.borrow_pool,
            base_token: c.base_token,
            position: c.position,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Send the trade and report how it went.
    async fn submit(&self, candidate: &ArbitrageCandidate) -> Result<TransactionRecord>;
}

/// Logs every candidate instead of sending it.
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl Executor for LoggingExecutor {
    async fn submit(&self, candidate: &ArbitrageCandidate) -> Result<TransactionRecord> {
        let params = SwapParams::from_candidate(candidate);
        info!(
            symbol = %candidate.buy_pool.symbol,
            buy_price = candidate.buy_pool.price,
            sell_price = candidate.sell_pool.price,
            amount = params.amount,
            estimated_usd = candidate.profit_usd,
            block = candidate.block_number,
            buy_pool = ?params.buy_pool,
            sell_pool = ?params.sell_pool,
            borrow = ?params.borrow,
            position = params.position,
            "[EXEC] dry run"
        );
        Ok(TransactionRecord {
            tx: String::new(),
            ok: true,
            confirm: false,
            buy_pool: params.buy_pool,
            sell_pool: params.sell_pool,
            base_token: params.base_token,
            event_block: candidate.block_number,
            use_gas: 0,
            created_at: SystemTime::now(),
            error: None,
        })
    }
}

/// Persist the outcome of a submission. After a failure, a market with
/// failed confirmed trades gets its non-base token blacklisted. Returns the
/// token that was blacklisted, if any.
pub async fn settle_submission(
    store: &dyn Store,
    blacklist: &mut Blacklist,
    candidate: &ArbitrageCandidate,
    record: TransactionRecord,
) -> Result<Option<Address>> {
    let ok = record.ok;
    store.record_transaction(record).await?;
    if ok {
        return Ok(None);
    }
    let failed = store
        .count_failed_transactions(candidate.buy_pool.pool, candidate.sell_pool.pool)
        .await?;
    if failed == 0 {
        return Ok(None);
    }
    let buy = &candidate.buy_pool;
    let token = if buy.token0 == candidate.base_token { buy.token1 } else { buy.token0 };
    warn!(
        token = ?token,
        failed,
        buy_pool = ?buy.pool,
        sell_pool = ?candidate.sell_pool.pool,
        "[EXEC] repeated failures, blacklisting token"
    );
    blacklist.add_token(token)?;
    Ok(Some(token))
}
