//! Miscellaneous helper utilities.

use bigdecimal::BigDecimal;
use ethers::types::U256;
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level (`debug` when the
/// configuration asks for it).
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn u256_to_bigint(value: U256) -> BigInt {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    BigInt::from_bytes_be(Sign::Plus, &buf)
}

/// Raw on-chain integer scaled down by `10^decimals`, exactly.
pub fn raw_to_decimal(raw: &BigInt, decimals: u8) -> BigDecimal {
    BigDecimal::new(raw.clone(), decimals as i64)
}

pub fn raw_to_f64(raw: &BigInt, decimals: u8) -> f64 {
    raw_to_decimal(raw, decimals).to_f64().unwrap_or(0.0)
}

/// Round `value` to `digits` fraction digits.
pub fn preserve_precision(value: f64, digits: usize) -> f64 {
    format!("{:.*}", digits, value).parse().unwrap_or(value)
}

/// Wei (as reported by the node) to native units.
pub fn wei_to_native(wei: U256) -> f64 {
    raw_to_f64(&u256_to_bigint(wei), 18)
}
