//! Persistence collaborator: known pools and tokens, current pair snapshots,
//! and trade history.

use crate::errors::Result;
use crate::models::{Pair, Pool, SimplePool, Token, TransactionRecord};
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Every write is a whole-document upsert, so repeating one is harmless.
#[async_trait]
pub trait Store: Send + Sync {
    /// Subset of `addresses` that are already stored pools.
    async fn lookup_known_pools(&self, addresses: &[Address]) -> Result<HashSet<Address>>;

    async fn lookup_known_tokens(&self, addresses: &[Address]) -> Result<HashSet<Address>>;

    /// Pools whose two tokens are both in `tokens`, with token metadata joined.
    async fn get_pools_by_tokens(&self, tokens: &[Address]) -> Result<Vec<Pool>>;

    async fn get_simple_pools(&self, addresses: &[Address]) -> Result<Vec<SimplePool>>;

    async fn get_token(&self, address: Address) -> Result<Option<Token>>;

    async fn upsert_pools(&self, pools: Vec<SimplePool>) -> Result<()>;

    async fn upsert_tokens(&self, tokens: Vec<Token>) -> Result<()>;

    /// Replace the pool's snapshot and bump its update counter.
    async fn upsert_pair(&self, pair: Pair) -> Result<Pair>;

    async fn upsert_pairs(&self, pairs: Vec<Pair>) -> Result<Vec<Pair>> {
        let mut saved = Vec::with_capacity(pairs.len());
        for pair in pairs {
            saved.push(self.upsert_pair(pair).await?);
        }
        Ok(saved)
    }

    /// Pairs whose two tokens are both in `tokens`.
    async fn get_pairs_by_tokens(&self, tokens: &[Address]) -> Result<Vec<Pair>>;

    /// Min and max gas used by past trades on this ordered pool pair;
    /// `(0, 0)` without history.
    async fn get_gas_stats(&self, buy_pool: Address, sell_pool: Address) -> Result<(u64, u64)>;

    async fn record_transaction(&self, record: TransactionRecord) -> Result<()>;

    /// Confirmed, failed trades between the two pools in either direction.
    async fn count_failed_transactions(&self, buy_pool: Address, sell_pool: Address) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Tables {
    pools: HashMap<Address, SimplePool>,
    tokens: HashMap<Address, Token>,
    pairs: HashMap<Address, Pair>,
    transactions: Vec<TransactionRecord>,
}

/// Process-local [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pool_count(&self) -> usize {
        self.tables.read().await.pools.len()
    }

    pub async fn token_count(&self) -> usize {
        self.tables.read().await.tokens.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lookup_known_pools(&self, addresses: &[Address]) -> Result<HashSet<Address>> {
        let t = self.tables.read().await;
        Ok(addresses.iter().filter(|a| t.pools.contains_key(a)).copied().collect())
    }

    async fn lookup_known_tokens(&self, addresses: &[Address]) -> Result<HashSet<Address>> {
        let t = self.tables.read().await;
        Ok(addresses.iter().filter(|a| t.tokens.contains_key(a)).copied().collect())
    }

    async fn get_pools_by_tokens(&self, tokens: &[Address]) -> Result<Vec<Pool>> {
        let t = self.tables.read().await;
        let mut pools: Vec<Pool> = t
            .pools
            .values()
            .filter(|p| tokens.contains(&p.token0) && tokens.contains(&p.token1))
            .filter_map(|p| {
                Some(Pool {
                    factory: p.factory,
                    address: p.address,
                    token0: t.tokens.get(&p.token0)?.clone(),
                    token1: t.tokens.get(&p.token1)?.clone(),
                })
            })
            .collect();
        pools.sort_by_key(|p| p.address);
        Ok(pools)
    }

    async fn get_simple_pools(&self, addresses: &[Address]) -> Result<Vec<SimplePool>> {
        let t = self.tables.read().await;
        Ok(addresses.iter().filter_map(|a| t.pools.get(a).copied()).collect())
    }

    async fn get_token(&self, address: Address) -> Result<Option<Token>> {
        Ok(self.tables.read().await.tokens.get(&address).cloned())
    }

    async fn upsert_pools(&self, pools: Vec<SimplePool>) -> Result<()> {
        let mut t = self.tables.write().await;
        for pool in pools {
            t.pools.insert(pool.address, pool);
        }
        Ok(())
    }

    async fn upsert_tokens(&self, tokens: Vec<Token>) -> Result<()> {
        let mut t = self.tables.write().await;
        for token in tokens {
            t.tokens.insert(token.address, token);
        }
        Ok(())
    }

    async fn upsert_pair(&self, mut pair: Pair) -> Result<Pair> {
        let mut t = self.tables.write().await;
        pair.update_times = t.pairs.get(&pair.pool).map_or(0, |p| p.update_times) + 1;
        t.pairs.insert(pair.pool, pair.clone());
        Ok(pair)
    }

    async fn get_pairs_by_tokens(&self, tokens: &[Address]) -> Result<Vec<Pair>> {
        let t = self.tables.read().await;
        let mut pairs: Vec<Pair> = t
            .pairs
            .values()
            .filter(|p| tokens.contains(&p.token0) && tokens.contains(&p.token1))
            .cloned()
            .collect();
        pairs.sort_by_key(|p| p.pool);
        Ok(pairs)
    }

    async fn get_gas_stats(&self, buy_pool: Address, sell_pool: Address) -> Result<(u64, u64)> {
        let t = self.tables.read().await;
        let used = t
            .transactions
            .iter()
            .filter(|tx| tx.buy_pool == buy_pool && tx.sell_pool == sell_pool)
            .map(|tx| tx.use_gas);
        Ok(used.fold(None, |acc: Option<(u64, u64)>, gas| match acc {
            None => Some((gas, gas)),
            Some((lo, hi)) => Some((lo.min(gas), hi.max(gas))),
        })
        .unwrap_or((0, 0)))
    }

    async fn record_transaction(&self, record: TransactionRecord) -> Result<()> {
        let mut t = self.tables.write().await;
        match t.transactions.iter_mut().find(|tx| !record.tx.is_empty() && tx.tx == record.tx) {
            Some(existing) => *existing = record,
            None => t.transactions.push(record),
        }
        Ok(())
    }

    async fn count_failed_transactions(&self, buy_pool: Address, sell_pool: Address) -> Result<usize> {
        let pools = [buy_pool, sell_pool];
        let t = self.tables.read().await;
        Ok(t.transactions
            .iter()
            .filter(|tx| !tx.ok && tx.confirm)
            .filter(|tx| pools.contains(&tx.buy_pool) && pools.contains(&tx.sell_pool))
            .count())
    }
}
