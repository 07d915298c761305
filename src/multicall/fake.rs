//! In-memory chain answering multicall batches, for tests.

use super::{BatchReturn, CallTransport, RawReturn};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use ethers::abi::{Token as AbiToken, encode};
use ethers::types::{Address, Bytes, U256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Canned answers keyed by (target, selector). Unknown calls revert.
#[derive(Default)]
pub(crate) struct FakeChain {
    answers: HashMap<(Address, [u8; 4]), Vec<u8>>,
    asked: Mutex<Vec<Address>>,
    pub(crate) down: AtomicBool,
    pub(crate) block_number: u64,
}

fn selector(sig: &str) -> [u8; 4] {
    ethers::utils::id(sig)
}

impl FakeChain {
    pub(crate) fn answer(&mut self, target: Address, sig: &str, output: Vec<AbiToken>) {
        self.answers.insert((target, selector(sig)), encode(&output));
    }

    pub(crate) fn pool(&mut self, pool: Address, factory: Address, token0: Address, token1: Address) {
        for (sig, value) in [("factory()", factory), ("token0()", token0), ("token1()", token1)] {
            self.answer(pool, sig, vec![AbiToken::Address(value)]);
        }
    }

    pub(crate) fn token(&mut self, token: Address, symbol: &str, decimals: u8) {
        self.answer(token, "name()", vec![AbiToken::String(symbol.to_string())]);
        self.answer(token, "symbol()", vec![AbiToken::String(symbol.to_string())]);
        self.supply(token, decimals);
    }

    pub(crate) fn legacy_token(&mut self, token: Address, symbol: &str, decimals: u8) {
        let mut word = [0u8; 32];
        word[..symbol.len()].copy_from_slice(symbol.as_bytes());
        self.answers.insert((token, selector("name()")), word.to_vec());
        self.answers.insert((token, selector("symbol()")), word.to_vec());
        self.supply(token, decimals);
    }

    fn supply(&mut self, token: Address, decimals: u8) {
        let supply = U256::from(1_000_000u64) * U256::exp10(decimals as usize);
        self.answer(token, "totalSupply()", vec![AbiToken::Uint(supply)]);
        self.answer(token, "decimals()", vec![AbiToken::Uint(U256::from(decimals))]);
    }

    /// Constant-product reserves, in raw units.
    pub(crate) fn reserves(&mut self, pool: Address, reserve0: U256, reserve1: U256) {
        self.answer(
            pool,
            "getReserves()",
            vec![AbiToken::Uint(reserve0), AbiToken::Uint(reserve1), AbiToken::Uint(U256::zero())],
        );
    }

    /// `balanceOf` answers the same amount for any holder.
    pub(crate) fn balance(&mut self, token: Address, amount: U256) {
        self.answer(token, "balanceOf(address)", vec![AbiToken::Uint(amount)]);
    }

    pub(crate) fn asked_count(&self) -> usize {
        self.asked.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub(crate) fn asked(&self, target: Address) -> usize {
        self.asked
            .lock()
            .map(|a| a.iter().filter(|t| **t == target).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CallTransport for FakeChain {
    async fn aggregate(&self, requests: &[(Address, Bytes)]) -> Result<BatchReturn> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::Transport("node unreachable".into()));
        }
        let mut returns = Vec::new();
        for (target, data) in requests {
            if let Ok(mut asked) = self.asked.lock() {
                asked.push(*target);
            }
            let mut sel = [0u8; 4];
            sel.copy_from_slice(&data[..4]);
            returns.push(match self.answers.get(&(*target, sel)) {
                Some(out) => RawReturn { success: true, data: out.clone().into() },
                None => RawReturn { success: false, data: Bytes::default() },
            });
        }
        let block_number = if self.block_number == 0 { 100 } else { self.block_number };
        Ok(BatchReturn { block_number, returns })
    }
}
