use crate::errors::{AppError, Result};
use async_trait::async_trait;
use ethers::abi::{ParamType, Token, decode, encode};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;

/// Raw per-call answer from the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReturn {
    pub success: bool,
    pub data: Bytes,
}

/// Answers for one physical batch, all read at `block_number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReturn {
    pub block_number: u64,
    pub returns: Vec<RawReturn>,
}

/// Executes one physical batch of `(target, calldata)` pairs.
///
/// Individual reverts are reported per call; `Err` means the whole batch
/// failed and no call in it has a result.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn aggregate(&self, requests: &[(Address, Bytes)]) -> Result<BatchReturn>;
}

const TRY_BLOCK_AND_AGGREGATE: &str = "tryBlockAndAggregate(bool,(address,bytes)[])";

/// Multicall3 aggregator reached through any ethers middleware.
pub struct MulticallTransport<M> {
    client: Arc<M>,
    address: Address,
}

impl<M: Middleware> MulticallTransport<M> {
    pub fn new(client: Arc<M>, address: Address) -> Self {
        Self { client, address }
    }

    fn encode_request(requests: &[(Address, Bytes)]) -> Bytes {
        let calls = requests
            .iter()
            .map(|(target, data)| Token::Tuple(vec![Token::Address(*target), Token::Bytes(data.to_vec())]))
            .collect();
        let mut data = ethers::utils::id(TRY_BLOCK_AND_AGGREGATE).to_vec();
        // requireSuccess = false: a revert stays local to its call
        data.extend(encode(&[Token::Bool(false), Token::Array(calls)]));
        data.into()
    }
}

pub(crate) fn decode_batch(raw: &[u8], expected: usize) -> Result<BatchReturn> {
    let kinds = [
        ParamType::Uint(256),
        ParamType::FixedBytes(32),
        ParamType::Array(Box::new(ParamType::Tuple(vec![ParamType::Bool, ParamType::Bytes]))),
    ];
    let mut tokens = decode(&kinds, raw)?.into_iter();
    let block_number = tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| AppError::Transport("missing block number".into()))?;
    let results = tokens
        .nth(1)
        .and_then(Token::into_array)
        .ok_or_else(|| AppError::Transport("missing results".into()))?;

    let mut returns = Vec::with_capacity(results.len());
    for item in results {
        let mut fields = item.into_tuple().unwrap_or_default().into_iter();
        let success = fields.next().and_then(Token::into_bool);
        let data = fields.next().and_then(Token::into_bytes);
        match (success, data) {
            (Some(success), Some(data)) => returns.push(RawReturn { success, data: data.into() }),
            _ => return Err(AppError::Transport("malformed multicall result".into())),
        }
    }
    if returns.len() != expected {
        return Err(AppError::Transport(format!(
            "multicall returned {} results for {} calls",
            returns.len(),
            expected
        )));
    }
    Ok(BatchReturn { block_number: block_number.as_u64(), returns })
}

#[async_trait]
impl<M> CallTransport for MulticallTransport<M>
where
    M: Middleware + 'static,
{
    async fn aggregate(&self, requests: &[(Address, Bytes)]) -> Result<BatchReturn> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.address)
            .data(Self::encode_request(requests))
            .into();
        let raw = self
            .client
            .call(&tx, None)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;
        decode_batch(&raw, requests.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_batch(block: u64, items: &[(bool, Vec<u8>)]) -> Vec<u8> {
        let results = items
            .iter()
            .map(|(ok, data)| Token::Tuple(vec![Token::Bool(*ok), Token::Bytes(data.clone())]))
            .collect();
        encode(&[
            Token::Uint(U256::from(block)),
            Token::FixedBytes(vec![0u8; 32]),
            Token::Array(results),
        ])
    }

    #[test]
    fn decodes_block_and_per_call_results() {
        let raw = encoded_batch(19_000_000, &[(true, vec![1, 2]), (false, vec![])]);
        let batch = decode_batch(&raw, 2).unwrap();
        assert_eq!(batch.block_number, 19_000_000);
        assert_eq!(batch.returns.len(), 2);
        assert!(batch.returns[0].success);
        assert_eq!(batch.returns[0].data.to_vec(), vec![1, 2]);
        assert!(!batch.returns[1].success);
    }

    #[test]
    fn result_count_mismatch_is_transport_error() {
        let raw = encoded_batch(1, &[(true, vec![])]);
        assert!(matches!(decode_batch(&raw, 2), Err(AppError::Transport(_))));
    }

    #[test]
    fn request_starts_with_selector() {
        let data = MulticallTransport::<Provider<Http>>::encode_request(&[(
            Address::repeat_byte(1),
            Bytes::from(vec![0xde, 0xad]),
        )]);
        assert_eq!(&data[..4], &ethers::utils::id(TRY_BLOCK_AND_AGGREGATE)[..]);
    }
}
