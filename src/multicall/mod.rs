//! Batched read-only contract calls over a Multicall3 aggregator.

pub mod call;
pub mod concurrency;
pub mod engine;
#[cfg(test)]
pub(crate) mod fake;
pub mod transport;

pub use call::{Call, CallError, function};
pub use engine::CallEngine;
pub use transport::{BatchReturn, CallTransport, MulticallTransport, RawReturn};
