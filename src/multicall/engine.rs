use super::call::{Call, CallError};
use super::concurrency::{bounded_parallel_map, map_chunks};
use super::transport::CallTransport;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes many read-only calls through a [`CallTransport`], split into
/// bounded batches with a bounded number of batches in flight.
///
/// Output always mirrors input: same length, same order. Failures are
/// recorded on the individual calls, never by dropping them.
#[derive(Clone)]
pub struct CallEngine {
    transport: Arc<dyn CallTransport>,
    chunk_length: usize,
    max_concurrent: usize,
}

impl CallEngine {
    pub fn new(transport: Arc<dyn CallTransport>, chunk_length: usize, max_concurrent: usize) -> Self {
        Self {
            transport,
            chunk_length: chunk_length.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn execute(&self, calls: Vec<Call>) -> Vec<Call> {
        if calls.is_empty() {
            return calls;
        }
        let transport = self.transport.clone();
        bounded_parallel_map(calls, self.chunk_length, self.max_concurrent, move |index, batch| {
            run_batch(transport.clone(), index, batch)
        })
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    /// Execute groups of calls, never splitting a group across batches so
    /// every call in a group is read at the same block.
    pub async fn execute_grouped(&self, groups: Vec<Vec<Call>>) -> Vec<Vec<Call>> {
        if groups.is_empty() {
            return groups;
        }
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        let batches = pack_groups(groups, self.chunk_length);
        let transport = self.transport.clone();
        let done = map_chunks(batches, self.max_concurrent, move |index, batch| {
            run_batch(transport.clone(), index, batch)
        })
        .await;

        let mut flat = done.into_iter().flatten();
        sizes
            .into_iter()
            .map(|size| flat.by_ref().take(size).collect())
            .collect()
    }
}

/// Pack whole groups into batches of at most `limit` calls. A group larger
/// than `limit` gets a batch of its own.
fn pack_groups(groups: Vec<Vec<Call>>, limit: usize) -> Vec<Vec<Call>> {
    let mut batches = Vec::new();
    let mut current: Vec<Call> = Vec::new();
    for group in groups {
        if !current.is_empty() && current.len() + group.len() > limit {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

async fn run_batch(transport: Arc<dyn CallTransport>, index: usize, mut calls: Vec<Call>) -> Vec<Call> {
    let started = Instant::now();
    let mut slots = Vec::with_capacity(calls.len());
    let mut requests = Vec::with_capacity(calls.len());
    for (slot, call) in calls.iter_mut().enumerate() {
        match call.calldata() {
            Ok(data) => {
                requests.push((call.target, data));
                slots.push(slot);
            }
            Err(e) => call.fail(CallError::Encode(e.to_string())),
        }
    }
    if requests.is_empty() {
        return calls;
    }

    match transport.aggregate(&requests).await {
        Ok(batch) => {
            for (slot, raw) in slots.into_iter().zip(batch.returns) {
                calls[slot].resolve(raw.success, raw.data, batch.block_number);
            }
            debug!(
                batch = index,
                calls = requests.len(),
                block = batch.block_number,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "[MULTICALL] batch done"
            );
        }
        Err(e) => {
            warn!(batch = index, calls = requests.len(), error = %e, "[MULTICALL] batch failed");
            let reason = e.to_string();
            for slot in slots {
                calls[slot].fail(CallError::Transport(reason.clone()));
            }
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use crate::multicall::call::function;
    use crate::multicall::transport::{BatchReturn, RawReturn};
    use async_trait::async_trait;
    use ethers::abi::{Token, encode};
    use ethers::types::{Address, Bytes, U256};
    use rand::Rng;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes each target's low 8 bytes back as a uint256 after a random delay.
    struct EchoTransport {
        batch_sizes: Mutex<Vec<usize>>,
        fail_containing: Option<Address>,
    }

    impl EchoTransport {
        fn new() -> Self {
            Self { batch_sizes: Mutex::new(Vec::new()), fail_containing: None }
        }
    }

    #[async_trait]
    impl CallTransport for EchoTransport {
        async fn aggregate(&self, requests: &[(Address, Bytes)]) -> Result<BatchReturn> {
            let delay = rand::thread_rng().gen_range(0..20);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.batch_sizes.lock().unwrap().push(requests.len());
            if let Some(bad) = self.fail_containing {
                if requests.iter().any(|(target, _)| *target == bad) {
                    return Err(AppError::Transport("connection reset".into()));
                }
            }
            let returns = requests
                .iter()
                .map(|(target, _)| {
                    let id = U256::from(target.to_low_u64_be());
                    RawReturn { success: id != U256::from(13), data: encode(&[Token::Uint(id)]).into() }
                })
                .collect();
            Ok(BatchReturn { block_number: 42, returns })
        }
    }

    fn calls(n: u64) -> Vec<Call> {
        let f = function("function echo() view returns (uint256)").unwrap();
        (0..n)
            .map(|i| Call::new(Address::from_low_u64_be(i), f.clone(), vec![]).named(i.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn output_matches_input_order_with_random_latency() {
        let engine = CallEngine::new(Arc::new(EchoTransport::new()), 7, 3);
        let out = engine.execute(calls(100)).await;
        assert_eq!(out.len(), 100);
        for (i, call) in out.iter().enumerate() {
            assert_eq!(call.name, i.to_string());
            if i == 13 {
                assert_eq!(call.error, Some(CallError::Reverted));
            } else {
                assert_eq!(call.uint(0), Some(U256::from(i)));
                assert_eq!(call.block_number, Some(42));
            }
        }
    }

    #[tokio::test]
    async fn transport_failure_marks_whole_batch_only() {
        let transport = EchoTransport { fail_containing: Some(Address::from_low_u64_be(5)), ..EchoTransport::new() };
        let engine = CallEngine::new(Arc::new(transport), 4, 2);
        let out = engine.execute(calls(12)).await;
        assert_eq!(out.len(), 12);
        for (i, call) in out.iter().enumerate() {
            let in_bad_batch = (4..8).contains(&i);
            assert_eq!(matches!(call.error, Some(CallError::Transport(_))), in_bad_batch, "call {i}");
        }
    }

    #[tokio::test]
    async fn groups_are_never_split_across_batches() {
        let transport = Arc::new(EchoTransport::new());
        let engine = CallEngine::new(transport.clone(), 5, 2);
        let mut all = calls(12).into_iter();
        let groups: Vec<Vec<Call>> = [3, 3, 2, 4].iter().map(|n| all.by_ref().take(*n).collect()).collect();
        let out = engine.execute_grouped(groups).await;

        assert_eq!(out.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 2, 4]);
        let mut sizes = transport.batch_sizes.lock().unwrap().clone();
        sizes.sort();
        assert_eq!(sizes, vec![3, 4, 5]);
        assert_eq!(out[3][3].uint(0), Some(U256::from(11)));
    }

    #[test]
    fn oversized_group_gets_its_own_batch() {
        let mut all = calls(9).into_iter();
        let groups: Vec<Vec<Call>> = [2, 6, 1].iter().map(|n| all.by_ref().take(*n).collect()).collect();
        let batches = pack_groups(groups, 4);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 6, 1]);
    }
}
