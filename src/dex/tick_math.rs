//! Exact Q64.96 square-root price at a tick, bit-compatible with the
//! on-chain `TickMath.getSqrtRatioAtTick`.

use crate::errors::{AppError, Result};
use ethers::types::U256;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// `sqrt_price_from_tick(MIN_TICK)`.
pub const MIN_SQRT_RATIO: U256 = U256([4_295_128_739, 0, 0, 0]);
/// `sqrt_price_from_tick(MAX_TICK)`.
pub const MAX_SQRT_RATIO: U256 = U256([0x5d95_1d52_6398_8d26, 0xefd1_fc6a_5064_8849, 0xfffd_8963, 0]);

const ODD_TICK_RATIO: u128 = 0xfffcb933bd6fad37aa2d162d1a594001;

/// `2^128 / sqrt(1.0001)^(2^(i+1))` in Q128, for bits 1..=19 of |tick|.
const RATIO_FACTORS: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// `sqrt(1.0001^tick) * 2^96`, rounded up.
pub fn sqrt_price_from_tick(tick: i32) -> Result<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(AppError::Math(format!("tick {tick} outside [{MIN_TICK}, {MAX_TICK}]")));
    }
    let abs = tick.unsigned_abs();

    let mut ratio = if abs & 1 != 0 {
        U256::from(ODD_TICK_RATIO)
    } else {
        U256::one() << 128
    };
    for (bit, factor) in RATIO_FACTORS.iter().enumerate() {
        if abs & (2 << bit) != 0 {
            ratio = (ratio * U256::from(*factor)) >> 128;
        }
    }
    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up
    let round_up = !(ratio & U256::from(u32::MAX)).is_zero();
    let sqrt_price = ratio >> 32;
    Ok(if round_up { sqrt_price + U256::one() } else { sqrt_price })
}

/// Clamp a tick into the valid range.
pub fn clamp_tick(tick: i64) -> i32 {
    tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32
}
