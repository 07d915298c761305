use crate::errors::{AppError, Result};
use ethers::abi::{Function, ParamType, Token, parse_abi};
use ethers::types::{Address, Bytes, I256, U256};
use std::sync::Arc;

/// Why a single call produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The whole physical batch failed; every call in it carries this.
    Transport(String),
    /// The arguments could not be ABI-encoded.
    Encode(String),
    /// The target reverted (multicall reported `success == false`).
    Reverted,
    /// The call succeeded but the return data did not match the expected outputs.
    Decode(String),
}

/// Parse a single human-readable function signature, e.g.
/// `"function token0() view returns (address)"`.
pub fn function(signature: &str) -> Result<Arc<Function>> {
    let abi = parse_abi(&[signature])?;
    abi.functions()
        .next()
        .cloned()
        .map(Arc::new)
        .ok_or_else(|| AppError::Config(format!("no function in signature '{signature}'")))
}

/// One read-only contract call plus, once executed, its decoded result.
///
/// `name` is an opaque tag callers use to correlate results back to the pool
/// (or token) they were built for.
#[derive(Debug, Clone)]
pub struct Call {
    pub target: Address,
    pub function: Arc<Function>,
    pub args: Vec<Token>,
    pub name: String,
    pub outputs: Vec<Token>,
    pub error: Option<CallError>,
    pub return_data: Bytes,
    /// Block the containing batch was read at.
    pub block_number: Option<u64>,
}

impl Call {
    pub fn new(target: Address, function: Arc<Function>, args: Vec<Token>) -> Self {
        Self {
            target,
            function,
            args,
            name: String::new(),
            outputs: Vec::new(),
            error: None,
            return_data: Bytes::default(),
            block_number: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.function.name
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn calldata(&self) -> Result<Bytes> {
        Ok(self.function.encode_input(&self.args)?.into())
    }

    /// Record the raw result for this call and decode it in place.
    pub fn resolve(&mut self, success: bool, data: Bytes, block_number: u64) {
        self.block_number = Some(block_number);
        if !success {
            self.return_data = data;
            self.error = Some(CallError::Reverted);
            return;
        }
        match self.function.decode_output(&data) {
            Ok(tokens) => {
                self.outputs = tokens;
                self.error = None;
            }
            Err(e) => self.error = Some(CallError::Decode(e.to_string())),
        }
        self.return_data = data;
    }

    pub fn fail(&mut self, error: CallError) {
        self.outputs.clear();
        self.error = Some(error);
    }

    /// A string-typed call whose target answered with one raw 32-byte word:
    /// the signature of an old ERC-20 that returns `bytes32` name/symbol.
    pub fn is_legacy_string_failure(&self) -> bool {
        matches!(self.error, Some(CallError::Decode(_)))
            && self.return_data.len() == 32
            && matches!(
                self.function.outputs.first().map(|p| &p.kind),
                Some(ParamType::String)
            )
    }

    pub fn output(&self, index: usize) -> Option<&Token> {
        if self.failed() {
            return None;
        }
        self.outputs.get(index)
    }

    pub fn uint(&self, index: usize) -> Option<U256> {
        self.output(index).cloned().and_then(Token::into_uint)
    }

    pub fn int(&self, index: usize) -> Option<I256> {
        self.output(index)
            .cloned()
            .and_then(Token::into_int)
            .map(I256::from_raw)
    }

    pub fn address(&self, index: usize) -> Option<Address> {
        self.output(index).cloned().and_then(Token::into_address)
    }

    /// Either a proper ABI string or a NUL-padded `bytes32`.
    pub fn text(&self, index: usize) -> Option<String> {
        match self.output(index)? {
            Token::String(s) => Some(s.clone()),
            Token::FixedBytes(b) => Some(
                String::from_utf8_lossy(b)
                    .trim_end_matches('\u{0}')
                    .replace('\u{0}', ""),
            ),
            _ => None,
        }
    }
}
