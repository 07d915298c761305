use super::blacklist::{Blacklist, ListKind};
use crate::errors::Result;
use crate::models::{SimplePool, Token};
use crate::multicall::{Call, CallEngine, CallError, function};
use crate::store::Store;
use crate::utils::{raw_to_decimal, u256_to_bigint};
use ethers::abi::Function;
use ethers::types::Address;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What one onboarding pass decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OnboardingReport {
    /// Addresses that must not be priced this window.
    pub dropped: HashSet<Address>,
    /// Subset of `dropped` that is now permanently quarantined.
    pub blacklisted: HashSet<Address>,
    pub new_pools: usize,
    pub new_tokens: usize,
}

/// ERC-20 metadata calls for one ABI shape.
#[derive(Debug, Clone)]
struct TokenAbi {
    name: Arc<Function>,
    symbol: Arc<Function>,
    total_supply: Arc<Function>,
    decimals: Arc<Function>,
}

impl TokenAbi {
    fn new(text_type: &str) -> Result<Self> {
        Ok(Self {
            name: function(&format!("function name() view returns ({text_type})"))?,
            symbol: function(&format!("function symbol() view returns ({text_type})"))?,
            total_supply: function("function totalSupply() view returns (uint256)")?,
            decimals: function("function decimals() view returns (uint8)")?,
        })
    }

    fn calls(&self, token: Address) -> Vec<Call> {
        let tag = format!("{token:?}");
        [&self.name, &self.symbol, &self.total_supply, &self.decimals]
            .into_iter()
            .map(|f| Call::new(token, f.clone(), vec![]).named(tag.clone()))
            .collect()
    }
}

enum TokenOutcome {
    Resolved(Token),
    Legacy,
    Transient,
    Failed,
}

/// Resolves unknown pools (and their tokens) before they can be priced,
/// quarantining anything that cannot be validated.
pub struct Onboarding {
    engine: CallEngine,
    store: Arc<dyn Store>,
    factories: HashSet<Address>,
    factory: Arc<Function>,
    token0: Arc<Function>,
    token1: Arc<Function>,
    erc20: TokenAbi,
    erc20_legacy: TokenAbi,
}

impl Onboarding {
    pub fn new(
        engine: CallEngine,
        store: Arc<dyn Store>,
        factories: impl IntoIterator<Item = Address>,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            store,
            factories: factories.into_iter().collect(),
            factory: function("function factory() view returns (address)")?,
            token0: function("function token0() view returns (address)")?,
            token1: function("function token1() view returns (address)")?,
            erc20: TokenAbi::new("string")?,
            erc20_legacy: TokenAbi::new("bytes32")?,
        })
    }

    /// Make sure every address in `candidates` is a stored pool with stored
    /// tokens, or report it as dropped.
    pub async fn onboard(&self, candidates: &[Address], blacklist: &mut Blacklist) -> Result<OnboardingReport> {
        let mut report = OnboardingReport::default();
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for address in candidates {
            if !seen.insert(*address) {
                continue;
            }
            if blacklist.contains_pool(address) {
                report.dropped.insert(*address);
            } else {
                fresh.push(*address);
            }
        }

        let known = self.store.lookup_known_pools(&fresh).await?;
        let unknown: Vec<Address> = fresh.into_iter().filter(|a| !known.contains(a)).collect();
        debug!(
            candidates = seen.len(),
            known = known.len(),
            unknown = unknown.len(),
            "[ONBOARD] partitioned candidates"
        );
        if unknown.is_empty() {
            return Ok(report);
        }

        let started = Instant::now();
        let mut quarantine = Vec::new();
        let pools = self.fetch_pools(&unknown, blacklist, &mut report, &mut quarantine).await;

        let mut tokens: Vec<Address> = pools.iter().flat_map(|p| [p.token0, p.token1]).collect();
        tokens.sort();
        tokens.dedup();
        let known_tokens = self.store.lookup_known_tokens(&tokens).await?;
        let missing: Vec<Address> = tokens.into_iter().filter(|t| !known_tokens.contains(t)).collect();
        let (resolved, failed, transient) = self.fetch_tokens(&missing, blacklist).await?;

        let mut accepted = Vec::with_capacity(pools.len());
        for pool in pools {
            let tokens = [pool.token0, pool.token1];
            if tokens.iter().any(|t| failed.contains(t)) {
                quarantine.push(pool.address);
            } else if tokens.iter().any(|t| transient.contains(t)) {
                report.dropped.insert(pool.address);
            } else {
                accepted.push(pool);
            }
        }

        // tokens first: a stored pool must always resolve its tokens
        report.new_tokens = resolved.len();
        report.new_pools = accepted.len();
        if !resolved.is_empty() {
            self.store.upsert_tokens(resolved).await?;
        }
        if !accepted.is_empty() {
            self.store.upsert_pools(accepted).await?;
        }

        if !quarantine.is_empty() {
            report.dropped.extend(quarantine.iter().copied());
            report.blacklisted.extend(quarantine.iter().copied());
            blacklist.add(ListKind::Pool, quarantine)?;
        }

        info!(
            new_pools = report.new_pools,
            new_tokens = report.new_tokens,
            dropped = report.dropped.len(),
            blacklisted = report.blacklisted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[ONBOARD] window onboarded"
        );
        Ok(report)
    }

    /// `factory()`, `token0()`, `token1()` for each pool; returns the pools
    /// that passed validation.
    async fn fetch_pools(
        &self,
        pools: &[Address],
        blacklist: &Blacklist,
        report: &mut OnboardingReport,
        quarantine: &mut Vec<Address>,
    ) -> Vec<SimplePool> {
        let groups: Vec<Vec<Call>> = pools
            .iter()
            .map(|pool| {
                let tag = format!("{pool:?}");
                [&self.factory, &self.token0, &self.token1]
                    .into_iter()
                    .map(|f| Call::new(*pool, f.clone(), vec![]).named(tag.clone()))
                    .collect()
            })
            .collect();
        let results = self.engine.execute_grouped(groups).await;

        let mut valid = Vec::new();
        for (address, calls) in pools.iter().zip(results) {
            if calls.iter().any(|c| matches!(c.error, Some(CallError::Transport(_)))) {
                report.dropped.insert(*address);
                continue;
            }
            let fields = (calls[0].address(0), calls[1].address(0), calls[2].address(0));
            let (Some(factory), Some(token0), Some(token1)) = fields else {
                info!(pool = ?address, "[ONBOARD] pool metadata call failed");
                quarantine.push(*address);
                continue;
            };
            if blacklist.contains_token(&token0) || blacklist.contains_token(&token1) {
                info!(pool = ?address, "[ONBOARD] pool trades a blacklisted token");
                quarantine.push(*address);
                continue;
            }
            if !self.factories.contains(&factory) {
                info!(pool = ?address, factory = ?factory, "[ONBOARD] unsupported factory");
                quarantine.push(*address);
                continue;
            }
            valid.push(SimplePool { factory, address: *address, token0, token1 });
        }
        valid
    }

    /// Fetch ERC-20 metadata. Returns (resolved, permanently failed, transiently failed).
    async fn fetch_tokens(
        &self,
        tokens: &[Address],
        blacklist: &mut Blacklist,
    ) -> Result<(Vec<Token>, HashSet<Address>, HashSet<Address>)> {
        let mut resolved = Vec::new();
        let mut failed = HashSet::new();
        let mut transient = HashSet::new();
        if tokens.is_empty() {
            return Ok((resolved, failed, transient));
        }

        let mut pending: Vec<Address> = tokens.to_vec();
        // second round only re-asks tokens just learned to be legacy
        for round in 0..2 {
            let groups: Vec<Vec<Call>> = pending
                .iter()
                .map(|t| {
                    let abi = if blacklist.is_legacy(t) { &self.erc20_legacy } else { &self.erc20 };
                    abi.calls(*t)
                })
                .collect();
            let results = self.engine.execute_grouped(groups).await;

            let mut learned = Vec::new();
            for (token, calls) in pending.iter().zip(results) {
                match token_outcome(*token, &calls) {
                    TokenOutcome::Resolved(t) => resolved.push(t),
                    TokenOutcome::Legacy if round == 0 && !blacklist.is_legacy(token) => {
                        learned.push(*token)
                    }
                    TokenOutcome::Legacy | TokenOutcome::Failed => {
                        info!(token = ?token, "[ONBOARD] token metadata failed");
                        failed.insert(*token);
                    }
                    TokenOutcome::Transient => {
                        transient.insert(*token);
                    }
                }
            }
            if learned.is_empty() {
                break;
            }
            warn!(count = learned.len(), "[ONBOARD] learned legacy ERC-20 tokens, retrying");
            blacklist.add(ListKind::LegacyToken, learned.iter().copied())?;
            pending = learned;
        }
        Ok((resolved, failed, transient))
    }
}

fn token_outcome(address: Address, calls: &[Call]) -> TokenOutcome {
    if calls.iter().any(|c| matches!(c.error, Some(CallError::Transport(_)))) {
        return TokenOutcome::Transient;
    }
    if calls.iter().any(Call::is_legacy_string_failure) {
        return TokenOutcome::Legacy;
    }
    let name = calls[0].text(0);
    let symbol = calls[1].text(0);
    let supply = calls[2].uint(0);
    let decimals = calls[3].uint(0).and_then(|d| u8::try_from(d.low_u64()).ok());
    match (name, symbol, supply, decimals) {
        (Some(name), Some(symbol), Some(supply), Some(decimals)) => TokenOutcome::Resolved(Token {
            address,
            name,
            symbol,
            decimals,
            total_supply: raw_to_decimal(&u256_to_bigint(supply), decimals),
        }),
        _ => TokenOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicall::fake::FakeChain;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;

    const FACTORY: u8 = 0xfa;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn setup(chain: FakeChain) -> (Arc<FakeChain>, Arc<MemoryStore>, Onboarding) {
        let chain = Arc::new(chain);
        let store = Arc::new(MemoryStore::new());
        let engine = CallEngine::new(chain.clone(), 6, 2);
        let onboarding = Onboarding::new(engine, store.clone(), [addr(FACTORY)]).unwrap();
        (chain, store, onboarding)
    }

    #[tokio::test]
    async fn onboarding_is_idempotent() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xa1), addr(FACTORY), addr(1), addr(2));
        chain.pool(addr(0xa2), addr(FACTORY), addr(2), addr(1));
        chain.token(addr(1), "WETH", 18);
        chain.token(addr(2), "USDC", 6);
        let (chain, store, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();

        let pools = [addr(0xa1), addr(0xa2), addr(0xa1)];
        let first = onboarding.onboard(&pools, &mut blacklist).await.unwrap();
        assert!(first.dropped.is_empty());
        assert_eq!((first.new_pools, first.new_tokens), (2, 2));
        let asked = chain.asked_count();

        let second = onboarding.onboard(&pools, &mut blacklist).await.unwrap();
        assert!(second.dropped.is_empty());
        assert_eq!((second.new_pools, second.new_tokens), (0, 0));
        assert_eq!(chain.asked_count(), asked, "known pools are not re-fetched");
        assert_eq!(store.pool_count().await, 2);
        assert_eq!(store.token_count().await, 2);

        let usdc = store.get_token(addr(2)).await.unwrap().unwrap();
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.total_supply, bigdecimal::BigDecimal::from(1_000_000));
    }

    #[tokio::test]
    async fn invalid_pool_is_blacklisted_and_never_retried() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xb1), addr(0x99), addr(1), addr(2)); // unknown factory
        chain.token(addr(1), "WETH", 18);
        chain.token(addr(2), "USDC", 6);
        let (chain, store, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();

        let report = onboarding.onboard(&[addr(0xb1)], &mut blacklist).await.unwrap();
        assert!(report.blacklisted.contains(&addr(0xb1)));
        assert!(blacklist.contains_pool(&addr(0xb1)));
        let asked = chain.asked_count();

        let again = onboarding.onboard(&[addr(0xb1)], &mut blacklist).await.unwrap();
        assert!(again.dropped.contains(&addr(0xb1)));
        assert_eq!(chain.asked_count(), asked);
        assert_eq!(store.pool_count().await, 0);

        // the quarantine survives a restart
        let reloaded = Blacklist::load(dir.path()).unwrap();
        assert!(reloaded.contains_pool(&addr(0xb1)));
    }

    #[tokio::test]
    async fn reverting_pool_and_blacklisted_token_are_quarantined() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xc2), addr(FACTORY), addr(1), addr(6));
        chain.token(addr(1), "WETH", 18);
        let (_, _, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();
        blacklist.add_token(addr(6)).unwrap();

        // 0xc1 has no contract behind it: every call reverts
        let report = onboarding.onboard(&[addr(0xc1), addr(0xc2)], &mut blacklist).await.unwrap();
        assert_eq!(report.blacklisted, HashSet::from([addr(0xc1), addr(0xc2)]));
    }

    #[tokio::test]
    async fn token_failure_blacklists_its_pools() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xd1), addr(FACTORY), addr(1), addr(7));
        chain.token(addr(1), "WETH", 18);
        // token 7 answers nothing
        let (_, store, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();

        let report = onboarding.onboard(&[addr(0xd1)], &mut blacklist).await.unwrap();
        assert!(report.blacklisted.contains(&addr(0xd1)));
        assert_eq!(store.pool_count().await, 0);
        assert_eq!(report.new_tokens, 1);
    }

    #[tokio::test]
    async fn transport_failure_drops_without_blacklisting() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xe1), addr(FACTORY), addr(1), addr(2));
        chain.down.store(true, Ordering::SeqCst);
        let (_, store, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();

        let report = onboarding.onboard(&[addr(0xe1)], &mut blacklist).await.unwrap();
        assert!(report.dropped.contains(&addr(0xe1)));
        assert!(report.blacklisted.is_empty());
        assert!(!blacklist.contains_pool(&addr(0xe1)));
        assert_eq!(store.pool_count().await, 0);
    }

    #[tokio::test]
    async fn legacy_token_is_learned_and_resolved_in_same_pass() {
        let mut chain = FakeChain::default();
        chain.pool(addr(0xf1), addr(FACTORY), addr(1), addr(3));
        chain.token(addr(1), "WETH", 18);
        chain.legacy_token(addr(3), "MKR", 18);
        let (_, store, onboarding) = setup(chain);
        let dir = tempfile::tempdir().unwrap();
        let mut blacklist = Blacklist::load(dir.path()).unwrap();

        let report = onboarding.onboard(&[addr(0xf1)], &mut blacklist).await.unwrap();
        assert!(report.dropped.is_empty());
        assert!(blacklist.is_legacy(&addr(3)));
        let mkr = store.get_token(addr(3)).await.unwrap().unwrap();
        assert_eq!(mkr.symbol, "MKR");
        assert!(Blacklist::load(dir.path()).unwrap().is_legacy(&addr(3)));
    }
}
