use crate::arbitrage::{ArbitrageStrategy, MarketContext};
use crate::dex::{Dex, DexRegistry};
use crate::errors::{AppError, Result};
use crate::execution::{Executor, settle_submission};
use crate::models::{ArbitrageCandidate, Pair, Pool, TransactionRecord};
use crate::multicall::{Call, CallEngine, function};
use crate::onboarding::{Blacklist, Onboarding};
use crate::store::Store;
use crate::utils::{raw_to_f64, u256_to_bigint, wei_to_native};
use async_trait::async_trait;
use ethers::abi::{Function, Token as AbiToken};
use ethers::providers::Middleware;
use ethers::types::{Address, Log, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Source of the node's suggested gas price.
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn gas_price_wei(&self) -> Result<U256>;
}

pub struct NodeGasOracle<M> {
    client: Arc<M>,
}

impl<M> NodeGasOracle<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> GasOracle for NodeGasOracle<M> {
    async fn gas_price_wei(&self) -> Result<U256> {
        self.client
            .get_gas_price()
            .await
            .map_err(|e| AppError::Transport(e.to_string()))
    }
}

/// Counters for one processed window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    pub events: usize,
    pub dropped: usize,
    /// Distinct token pairs evaluated.
    pub markets: usize,
    pub priced: usize,
    pub candidates: usize,
}

/// One market to refresh: the pool whose event triggered it, the block of
/// that event, and every known pool trading the same two tokens.
struct Market {
    trigger: Address,
    block_number: u64,
    pools: Vec<Pool>,
}

/// Everything that happens between a drained window and the executor.
///
/// Owns the blacklist: it is only ever mutated from here.
pub struct WindowProcessor {
    engine: CallEngine,
    store: Arc<dyn Store>,
    registry: DexRegistry,
    onboarding: Onboarding,
    strategy: Arc<dyn ArbitrageStrategy>,
    executor: Arc<dyn Executor>,
    gas: Arc<dyn GasOracle>,
    blacklist: Blacklist,
    trader: Option<Address>,
    gas_times: f64,
    /// Native units per gas, last known good.
    gas_price: f64,
    balance_of: Arc<Function>,
}

pub struct WindowDeps {
    pub engine: CallEngine,
    pub store: Arc<dyn Store>,
    pub registry: DexRegistry,
    pub onboarding: Onboarding,
    pub strategy: Arc<dyn ArbitrageStrategy>,
    pub executor: Arc<dyn Executor>,
    pub gas: Arc<dyn GasOracle>,
    pub blacklist: Blacklist,
}

impl WindowProcessor {
    pub fn new(deps: WindowDeps, trader: Option<Address>, gas_price: f64, gas_times: f64) -> Result<Self> {
        Ok(Self {
            engine: deps.engine,
            store: deps.store,
            registry: deps.registry,
            onboarding: deps.onboarding,
            strategy: deps.strategy,
            executor: deps.executor,
            gas: deps.gas,
            blacklist: deps.blacklist,
            trader,
            gas_times,
            gas_price: gas_price * gas_times,
            balance_of: function("function balanceOf(address owner) view returns (uint256)")?,
        })
    }

    pub fn gas_price(&self) -> f64 {
        self.gas_price
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Onboard, price and evaluate one drained window.
    pub async fn process(&mut self, logs: Vec<Log>) -> Result<WindowSummary> {
        let mut summary = WindowSummary {
            events: logs.len(),
            ..Default::default()
        };
        if logs.is_empty() {
            return Ok(summary);
        }
        let addresses: Vec<Address> = logs.iter().map(|l| l.address).collect();

        let started = Instant::now();
        let (report, gas) = tokio::join!(
            self.onboarding.onboard(&addresses, &mut self.blacklist),
            self.gas.gas_price_wei()
        );
        let report = report?;
        match gas {
            Ok(wei) => self.gas_price = wei_to_native(wei) * self.gas_times,
            Err(e) => error!(error = %e, gas_price = self.gas_price, "[MONITOR] gas price refresh failed"),
        }
        summary.dropped = report.dropped.len();
        info!(
            events = logs.len(),
            dropped = report.dropped.len(),
            blacklisted = report.blacklisted.len(),
            new_pools = report.new_pools,
            new_tokens = report.new_tokens,
            gas_price = self.gas_price,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[MONITOR] window preprocessed"
        );

        let surviving: Vec<&Log> = logs.iter().filter(|l| !report.dropped.contains(&l.address)).collect();
        let markets = self.markets(&surviving).await?;
        summary.markets = markets.len();
        if markets.is_empty() {
            return Ok(summary);
        }

        let started = Instant::now();
        let (pairs, inventory) = self.refresh_prices(&markets).await?;
        summary.priced = pairs.len();
        self.store.upsert_pairs(pairs).await?;
        info!(
            markets = markets.len(),
            priced = summary.priced,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[MONITOR] prices refreshed"
        );

        for market in &markets {
            let Some(pool) = market.pools.iter().find(|p| p.address == market.trigger) else {
                continue;
            };
            let ctx = MarketContext {
                block_number: market.block_number,
                gas_price: self.gas_price,
                inventory: inventory.clone(),
            };
            let Some(candidate) = self.strategy.calc_arbitrage(pool, &ctx).await? else {
                continue;
            };
            summary.candidates += 1;
            self.execute(candidate).await?;
        }
        Ok(summary)
    }

    /// One entry per unordered token pair, keeping the first event seen,
    /// with at least two priceable pools.
    async fn markets(&self, logs: &[&Log]) -> Result<Vec<Market>> {
        let addresses: Vec<Address> = logs.iter().map(|l| l.address).collect();
        let simple: HashMap<Address, _> = self
            .store
            .get_simple_pools(&addresses)
            .await?
            .into_iter()
            .map(|p| (p.address, p))
            .collect();

        let mut seen = HashSet::new();
        let mut markets = Vec::new();
        for log in logs {
            let Some(pool) = simple.get(&log.address) else {
                continue;
            };
            let key = if pool.token0 < pool.token1 {
                (pool.token0, pool.token1)
            } else {
                (pool.token1, pool.token0)
            };
            if !seen.insert(key) {
                continue;
            }
            if self.blacklist.contains_token(&key.0) || self.blacklist.contains_token(&key.1) {
                debug!(pool = ?pool.address, "[MONITOR] market has a blacklisted token");
                continue;
            }
            let pools: Vec<Pool> = self
                .store
                .get_pools_by_tokens(&[key.0, key.1])
                .await?
                .into_iter()
                .filter(|p| !self.blacklist.contains_pool(&p.address))
                .filter(|p| self.registry.by_factory(&p.factory).is_some())
                .collect();
            if pools.len() < 2 {
                continue;
            }
            markets.push(Market {
                trigger: pool.address,
                block_number: log.block_number.map_or(0, |b| b.as_u64()),
                pools,
            });
        }
        Ok(markets)
    }

    /// Price every pool of every market in one grouped multicall, plus the
    /// trader's base-token balances when a trader contract is configured.
    async fn refresh_prices(&self, markets: &[Market]) -> Result<(Vec<Pair>, HashMap<Address, f64>)> {
        let mut priced: Vec<(&Pool, Arc<Dex>)> = Vec::new();
        let mut groups: Vec<Vec<Call>> = Vec::new();
        let mut queued = HashSet::new();
        for pool in markets.iter().flat_map(|m| &m.pools) {
            let Some(dex) = self.registry.by_factory(&pool.factory) else {
                continue;
            };
            if !queued.insert(pool.address) {
                continue;
            }
            groups.push(dex.create_price_calls(pool));
            priced.push((pool, dex.clone()));
        }

        let base_tokens = match self.trader {
            Some(_) => self.strategy.base_tokens(),
            None => Vec::new(),
        };
        if let Some(trader) = self.trader {
            for token in &base_tokens {
                groups.push(vec![
                    Call::new(*token, self.balance_of.clone(), vec![AbiToken::Address(trader)])
                        .named(format!("{token:?}")),
                ]);
            }
        }
        let call_count: usize = groups.iter().map(Vec::len).sum();
        debug!(groups = groups.len(), calls = call_count, "[MULTICALL] price refresh");

        let mut results = self.engine.execute_grouped(groups).await.into_iter();
        let mut pairs = Vec::with_capacity(priced.len());
        for ((pool, dex), calls) in priced.into_iter().zip(results.by_ref()) {
            let block = calls.iter().find_map(|c| c.block_number).unwrap_or(0);
            match dex.calc_price(&calls, block, pool) {
                Some(pair) => pairs.push(pair),
                None => warn!(pool = ?pool.address, dex = %dex.name, "[PRICE] pool could not be priced"),
            }
        }

        let mut inventory = HashMap::new();
        for (token, calls) in base_tokens.into_iter().zip(results) {
            let (Some(raw), Some(meta)) = (
                calls.first().and_then(|c| c.uint(0)),
                self.store.get_token(token).await?,
            ) else {
                continue;
            };
            inventory.insert(token, raw_to_f64(&u256_to_bigint(raw), meta.decimals));
        }
        Ok((pairs, inventory))
    }

    async fn execute(&mut self, candidate: ArbitrageCandidate) -> Result<()> {
        let record = match self.executor.submit(&candidate).await {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, buy_pool = ?candidate.buy_pool.pool, "[EXEC] submission failed");
                TransactionRecord {
                    tx: String::new(),
                    ok: false,
                    confirm: false,
                    buy_pool: candidate.buy_pool.pool,
                    sell_pool: candidate.sell_pool.pool,
                    base_token: candidate.base_token,
                    event_block: candidate.block_number,
                    use_gas: 0,
                    created_at: SystemTime::now(),
                    error: Some(e.to_string()),
                }
            }
        };
        settle_submission(self.store.as_ref(), &mut self.blacklist, &candidate, record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{ArbitrageConfig, TwoPoolStrategy};
    use crate::config::{AppConfig, DexConfig, GasTokenConfig};
    use crate::multicall::fake::FakeChain;
    use crate::store::MemoryStore;
    use ethers::types::{H256, U64};
    use std::sync::Mutex;

    const FACTORY: u8 = 0xfa;
    const WETH: u8 = 1;
    const USDC: u8 = 2;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    struct FixedGas(Option<U256>);

    #[async_trait]
    impl GasOracle for FixedGas {
        async fn gas_price_wei(&self) -> Result<U256> {
            self.0.ok_or_else(|| AppError::Transport("gas unavailable".into()))
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        submitted: Mutex<Vec<ArbitrageCandidate>>,
        fail: bool,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn submit(&self, candidate: &ArbitrageCandidate) -> Result<TransactionRecord> {
            self.submitted.lock().unwrap().push(candidate.clone());
            Ok(TransactionRecord {
                tx: format!("0x{}", candidate.block_number),
                ok: !self.fail,
                confirm: true,
                buy_pool: candidate.buy_pool.pool,
                sell_pool: candidate.sell_pool.pool,
                base_token: candidate.base_token,
                event_block: candidate.block_number,
                use_gas: 200_000,
                created_at: SystemTime::now(),
                error: None,
            })
        }
    }

    fn log(pool: u8, block: u64) -> Log {
        Log {
            address: addr(pool),
            topics: vec![H256::repeat_byte(0x1c)],
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    fn eth(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(18)
    }

    fn usd(amount: u64) -> U256 {
        U256::from(amount) * U256::exp10(6)
    }

    /// Two WETH/USDC V2 pools at 2000 and 2010, one of them with tokens in
    /// reverse on-chain order.
    fn chain() -> FakeChain {
        let mut chain = FakeChain::default();
        chain.token(addr(WETH), "WETH", 18);
        chain.token(addr(USDC), "USDC", 6);
        chain.pool(addr(0xa0), addr(FACTORY), addr(WETH), addr(USDC));
        chain.reserves(addr(0xa0), eth(1000), usd(2_000_000));
        chain.pool(addr(0xb0), addr(FACTORY), addr(USDC), addr(WETH));
        chain.reserves(addr(0xb0), usd(2_010_000), eth(1000));
        chain.balance(addr(WETH), eth(5));
        chain
    }

    struct Harness {
        chain: Arc<FakeChain>,
        store: Arc<MemoryStore>,
        executor: Arc<RecordingExecutor>,
        processor: WindowProcessor,
        _dir: tempfile::TempDir,
    }

    fn harness(chain: FakeChain, executor: RecordingExecutor, gas: Option<U256>) -> Harness {
        let chain = Arc::new(chain);
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(executor);
        let engine = CallEngine::new(chain.clone(), 5, 2);

        let mut app = AppConfig::default();
        app.dexs = vec![DexConfig {
            name: "UniswapV2".into(),
            topic: H256::repeat_byte(0x1c),
            factory: addr(FACTORY),
            fee: 0.0,
        }];
        app.strategies.base_tokens.insert(addr(WETH), vec![addr(0xc0)]);
        app.strategies.gas_token = GasTokenConfig {
            base: addr(WETH),
            quote: addr(USDC),
        };
        let dir = tempfile::tempdir().unwrap();
        let deps = WindowDeps {
            engine: engine.clone(),
            store: store.clone(),
            registry: DexRegistry::from_config(&app.dexs).unwrap(),
            onboarding: Onboarding::new(engine, store.clone(), app.factories()).unwrap(),
            strategy: Arc::new(TwoPoolStrategy::new(ArbitrageConfig::from_app(&app), store.clone(), &app)),
            executor: executor.clone(),
            gas: Arc::new(FixedGas(gas)),
            blacklist: Blacklist::load(dir.path()).unwrap(),
        };
        let processor = WindowProcessor::new(deps, Some(addr(0x77)), 2e-9, 1.0).unwrap();
        Harness {
            chain,
            store,
            executor,
            processor,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn empty_window_is_a_noop() {
        let mut h = harness(chain(), RecordingExecutor::default(), None);
        let summary = h.processor.process(Vec::new()).await.unwrap();
        assert_eq!(summary, WindowSummary::default());
        assert_eq!(h.chain.asked_count(), 0);
    }

    #[tokio::test]
    async fn window_onboards_prices_and_submits() {
        let mut h = harness(chain(), RecordingExecutor::default(), Some(U256::from(1_000_000_000u64)));
        let summary = h.processor.process(vec![log(0xa0, 100), log(0xb0, 100)]).await.unwrap();

        assert_eq!(summary.events, 2);
        assert_eq!(summary.dropped, 0);
        // both pools trade WETH/USDC: one market
        assert_eq!(summary.markets, 1);
        assert_eq!(summary.priced, 2);
        assert_eq!(summary.candidates, 1);
        assert!((h.processor.gas_price() - 1e-9).abs() < 1e-18);

        let pairs = h.store.get_pairs_by_tokens(&[addr(WETH), addr(USDC)]).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.block_number == 100));

        let submitted = h.executor.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].buy_pool.pool, addr(0xa0));
        assert_eq!(submitted[0].sell_pool.pool, addr(0xb0));
        assert_eq!(submitted[0].block_number, 100);
    }

    #[tokio::test]
    async fn gas_failure_keeps_previous_price() {
        let mut h = harness(chain(), RecordingExecutor::default(), None);
        h.processor.process(vec![log(0xa0, 100)]).await.unwrap();
        assert_eq!(h.processor.gas_price(), 2e-9);
    }

    #[tokio::test]
    async fn single_pool_market_is_not_priced() {
        let mut chain = chain();
        chain.pool(addr(0xd0), addr(FACTORY), addr(WETH), addr(3));
        chain.token(addr(3), "DAI", 18);
        let mut h = harness(chain, RecordingExecutor::default(), None);
        let summary = h.processor.process(vec![log(0xd0, 100)]).await.unwrap();
        assert_eq!(summary.markets, 0);
        assert_eq!(h.chain.asked(addr(0xd0)), 3, "only onboarding calls");
    }

    #[tokio::test]
    async fn repeated_failure_blacklists_quote_token() {
        let executor = RecordingExecutor {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(chain(), executor, None);
        h.processor.process(vec![log(0xa0, 100), log(0xb0, 100)]).await.unwrap();
        assert!(h.processor.blacklist().contains_token(&addr(USDC)));

        // the market is now skipped
        let summary = h.processor.process(vec![log(0xb0, 101)]).await.unwrap();
        assert_eq!(summary.markets, 0);
        assert_eq!(h.executor.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_pool_is_dropped_from_window() {
        let mut h = harness(chain(), RecordingExecutor::default(), None);
        let summary = h.processor.process(vec![log(0xee, 100)]).await.unwrap();
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.markets, 0);
        assert!(h.processor.blacklist().contains_pool(&addr(0xee)));
    }
}
