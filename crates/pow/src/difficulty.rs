//! Compact target encoding, chain work and 64.32 fixed-point retarget math.

use hxd_consensus::{ChainParams, Hash256};
use num_bigint::{BigInt, Sign};
use num_traits::{Euclid, Signed, ToPrimitive, Zero};
use primitive_types::U256;

/// Fractional bits carried by every retarget ratio.
pub const FIXED_POINT_SHIFT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

/// Decodes compact bits into an unsigned 256-bit target, rejecting encodings
/// that are negative or do not fit.
pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    if (bits & 0x0080_0000) != 0 && word != 0 {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        if word != 0 {
            let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
            if overflow {
                return Err(CompactError::Overflow);
            }
        }
        U256::from(word) << (8 * (size - 3))
    };

    Ok(value)
}

/// Expected number of hashes needed to meet `bits`, i.e. `2^256 / (target + 1)`.
/// Zero and negative targets carry no work.
pub fn calc_work(bits: u32) -> U256 {
    let target = match compact_to_u256(bits) {
        Ok(target) if !target.is_zero() => target,
        _ => return U256::zero(),
    };
    if target == U256::max_value() {
        return U256::one();
    }
    (!target / (target + U256::one())) + U256::one()
}

/// Signed arbitrary-precision decoding of compact bits. Unlike
/// [`compact_to_u256`] this never fails: the sign bit yields a negative value
/// and oversized exponents are simply shifted.
pub fn compact_to_big(bits: u32) -> BigInt {
    let exponent = bits >> 24;
    let mut mantissa = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    let value = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        BigInt::from(mantissa)
    } else {
        BigInt::from(mantissa) << (8 * (exponent - 3) as usize)
    };

    if negative {
        -value
    } else {
        value
    }
}

pub fn big_to_compact(value: &BigInt) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let magnitude = value.magnitude();
    let mut exponent = magnitude.bits().div_ceil(8) as u32;
    let mut mantissa = if exponent <= 3 {
        low_u32(magnitude) << (8 * (3 - exponent))
    } else {
        low_u32(&(magnitude >> (8 * (exponent - 3) as usize)))
    };

    if (mantissa & 0x0080_0000) != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    let mut compact = (exponent << 24) | mantissa;
    if value.sign() == Sign::Minus {
        compact |= 0x0080_0000;
    }
    compact
}

fn low_u32(value: &num_bigint::BigUint) -> u32 {
    value.iter_u32_digits().next().unwrap_or(0)
}

/// Interprets a little-endian 256-bit value as a non-negative big integer.
pub fn hash_to_big(hash: &Hash256) -> BigInt {
    BigInt::from_bytes_le(Sign::Plus, hash)
}

/// Narrows a big integer to `i64`, saturating at the type bounds.
pub fn big_to_i64(value: &BigInt) -> i64 {
    value.to_i64().unwrap_or(if value.is_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Exponentially weighted average of per-window ratios in 64.32 fixed point.
///
/// Windows are pushed most recent first; window `n` of `windows` is weighted
/// by `2^((windows - n) * alpha)`.
pub struct WindowedRatio {
    windows: i64,
    alpha: i64,
    period: i64,
    weighted_sum: BigInt,
    weights: BigInt,
}

impl WindowedRatio {
    pub fn new(windows: i64, alpha: i64) -> Self {
        Self {
            windows,
            alpha,
            period: 0,
            weighted_sum: BigInt::zero(),
            weights: BigInt::zero(),
        }
    }

    /// Records the ratio `numerator / denominator` for the next older window.
    pub fn push(&mut self, numerator: i64, denominator: i64) {
        let shift = ((self.windows - self.period) * self.alpha).max(0) as usize;
        let ratio = if denominator == 0 {
            BigInt::zero()
        } else {
            (BigInt::from(numerator) << FIXED_POINT_SHIFT).div_euclid(&BigInt::from(denominator))
        };
        self.weighted_sum += ratio << shift;
        self.weights += BigInt::from(1u8) << shift;
        self.period += 1;
    }

    pub fn periods(&self) -> i64 {
        self.period
    }

    /// Scales `base` by the weighted mean ratio and drops the fixed-point
    /// fraction.
    pub fn apply(&self, base: &BigInt) -> BigInt {
        if self.weights.is_zero() {
            return base.clone();
        }
        let mean = self.weighted_sum.div_euclid(&self.weights);
        (mean * base) >> FIXED_POINT_SHIFT
    }
}

/// Easiest target a block may claim `duration` seconds after a block with
/// `bits`, assuming every retarget in between went to the maximum allowed
/// easing. Used to sanity check headers far ahead of the local chain.
pub fn calc_easiest_difficulty(params: &ChainParams, bits: u32, duration: i64) -> u32 {
    if params.reduce_min_difficulty && duration > params.min_diff_reduction_time {
        return params.pow_limit_bits;
    }

    let pow_limit = hash_to_big(&params.pow_limit);
    let factor = BigInt::from(params.retarget_adjustment_factor);
    let max_retarget_timespan = params.target_timespan * params.retarget_adjustment_factor;

    let mut target = compact_to_big(bits);
    if !target.is_positive() {
        return params.pow_limit_bits;
    }

    let mut remaining = duration;
    while remaining > 0 && target < pow_limit {
        target *= &factor;
        remaining -= max_retarget_timespan;
    }

    if target > pow_limit {
        target = pow_limit;
    }
    big_to_compact(&target)
}
