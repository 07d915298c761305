//! Price and reserve math shared by every protocol.
//!
//! Integer amounts are `BigInt` so that negative liquidity deltas keep
//! their sign; they are only turned into floats at the very end.

use crate::dex::tick_math::{MAX_TICK, MIN_TICK, sqrt_price_from_tick};
use crate::errors::{AppError, Result};
use crate::utils::{preserve_precision, raw_to_decimal, u256_to_bigint};
use bigdecimal::BigDecimal;
use ethers::types::U256;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

fn q96() -> BigInt {
    BigInt::from(1) << 96
}

fn div_round_up(numerator: &BigInt, denominator: &BigInt) -> BigInt {
    let quotient = numerator / denominator;
    if (numerator % denominator).is_zero() {
        quotient
    } else {
        quotient + 1
    }
}

/// token1 per token0 from raw reserves, both normalized by their decimals.
pub fn price_from_reserves(reserve0: &BigInt, reserve1: &BigInt, decimals0: u8, decimals1: u8) -> Option<f64> {
    let r0 = raw_to_decimal(reserve0, decimals0);
    if r0.is_zero() {
        return None;
    }
    let r1 = raw_to_decimal(reserve1, decimals1);
    (r1 / r0).to_f64()
}

/// `(sqrtPriceX96 / 2^96)^2 * 10^(decimals0 - decimals1)`.
pub fn price_from_sqrt_price(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    let sqrt_price = u256_to_bigint(sqrt_price_x96);
    let ten = BigInt::from(10);
    let numerator = &sqrt_price * &sqrt_price * num_traits::pow(ten.clone(), decimals0 as usize);
    let denominator = (BigInt::from(1) << 192) * num_traits::pow(ten, decimals1 as usize);
    (BigDecimal::from(numerator) / BigDecimal::from(denominator))
        .to_f64()
        .unwrap_or(0.0)
}

/// Fractional fee from an on-chain integer, e.g. `3000 * 1e-6 = 0.003`.
pub fn scaled_fee(raw: u64, scale: f64, digits: usize) -> f64 {
    preserve_precision(raw as f64 * scale, digits)
}

/// Bounds of the tick-spacing range containing `tick`, clamped so that the
/// range stays inside the global tick limits.
pub fn lower_upper_tick(tick: i32, tick_spacing: i32) -> Result<(i32, i32)> {
    if tick_spacing <= 0 {
        return Err(AppError::Math(format!("invalid tick spacing {tick_spacing}")));
    }
    let mut lower = tick.div_euclid(tick_spacing) * tick_spacing;
    let mut upper = lower + tick_spacing;
    if lower < MIN_TICK {
        lower = MIN_TICK;
        upper = lower + tick_spacing;
    }
    if upper > MAX_TICK {
        upper = MAX_TICK;
        lower = upper - tick_spacing;
    }
    Ok((lower, upper))
}

/// token0 owed for `liquidity` between two sqrt prices.
pub fn amount0_delta(liquidity: &BigInt, sqrt_a: &BigInt, sqrt_b: &BigInt, round_up: bool) -> BigInt {
    let (a, b) = if sqrt_a > sqrt_b { (sqrt_b, sqrt_a) } else { (sqrt_a, sqrt_b) };
    if a.is_zero() {
        return BigInt::zero();
    }
    let numerator = (liquidity << 96) * (b - a);
    if round_up {
        div_round_up(&div_round_up(&numerator, b), a)
    } else {
        numerator / b / a
    }
}

/// token1 owed for `liquidity` between two sqrt prices.
pub fn amount1_delta(liquidity: &BigInt, sqrt_a: &BigInt, sqrt_b: &BigInt, round_up: bool) -> BigInt {
    let (a, b) = if sqrt_a > sqrt_b { (sqrt_b, sqrt_a) } else { (sqrt_a, sqrt_b) };
    let product = liquidity * (b - a);
    if round_up {
        div_round_up(&product, &q96())
    } else {
        product / q96()
    }
}

/// Signed token0 delta: positive liquidity rounds up, negative rounds down.
pub fn calc_amount0(liquidity: &BigInt, sqrt_a: &BigInt, sqrt_b: &BigInt) -> BigInt {
    if liquidity.is_negative() {
        -amount0_delta(&-liquidity, sqrt_a, sqrt_b, false)
    } else {
        amount0_delta(liquidity, sqrt_a, sqrt_b, true)
    }
}

/// Signed token1 delta: positive liquidity rounds up, negative rounds down.
pub fn calc_amount1(liquidity: &BigInt, sqrt_a: &BigInt, sqrt_b: &BigInt) -> BigInt {
    if liquidity.is_negative() {
        -amount1_delta(&-liquidity, sqrt_a, sqrt_b, false)
    } else {
        amount1_delta(liquidity, sqrt_a, sqrt_b, true)
    }
}

/// Token amounts held by the active liquidity over the tick range around
/// the current price. An estimate, not literal pool balances.
pub fn reserves_in_range(
    tick: i32,
    tick_spacing: i32,
    liquidity: &BigInt,
    sqrt_price_x96: U256,
) -> Result<(BigInt, BigInt)> {
    let (lower, upper) = lower_upper_tick(tick, tick_spacing)?;
    let sqrt_lower = u256_to_bigint(sqrt_price_from_tick(lower)?);
    let sqrt_upper = u256_to_bigint(sqrt_price_from_tick(upper)?);
    let current = u256_to_bigint(sqrt_price_x96);
    Ok((
        calc_amount0(liquidity, &current, &sqrt_upper),
        calc_amount1(liquidity, &sqrt_lower, &current),
    ))
}
