//! Ticket price arithmetic that does not need chain traversal.

use hxd_consensus::{estimate_supply, ChainParams};
use num_bigint::BigInt;
use num_traits::{Euclid, Zero};

use crate::difficulty::{big_to_i64, FIXED_POINT_SHIFT};

/// DCP0001 ticket price for the block at `next_height`:
///
/// ```text
///              cur_diff * cur_pool_size_all^2
/// next = -------------------------------------------
///        prev_pool_size_all * target_pool_size_all
/// ```
///
/// bounded below by the minimum stake difficulty and above by the estimated
/// coin supply divided by the ticket pool size. An empty previous pool keeps
/// the current price.
pub fn calc_next_stake_diff(
    params: &ChainParams,
    next_height: i64,
    cur_diff: i64,
    prev_pool_size_all: i64,
    cur_pool_size_all: i64,
) -> i64 {
    let target_pool_size_all = params.target_pool_size_all();
    if prev_pool_size_all <= 0 || target_pool_size_all <= 0 {
        return cur_diff;
    }

    let cur_pool = BigInt::from(cur_pool_size_all);
    let mut next = BigInt::from(cur_diff) * &cur_pool * &cur_pool;
    next /= BigInt::from(prev_pool_size_all);
    next /= BigInt::from(target_pool_size_all);
    let next = big_to_i64(&next);

    let maximum = estimate_supply(params, next_height) / i64::from(params.ticket_pool_size);
    next.min(maximum).max(params.minimum_stake_diff)
}

/// Combines two independently retargeted prices relative to `old_diff`:
/// the result moves from `old_diff` by the product of both relative changes.
pub fn merge_difficulty(old_diff: i64, new_diff1: i64, new_diff2: i64) -> i64 {
    if old_diff == 0 || new_diff1 == 0 {
        return old_diff;
    }

    let old = BigInt::from(old_diff);
    let first =
        (BigInt::from(old_diff) << FIXED_POINT_SHIFT).div_euclid(&BigInt::from(new_diff1));
    let second = (BigInt::from(new_diff2) << FIXED_POINT_SHIFT).div_euclid(&old);
    if first.is_zero() {
        return old_diff;
    }

    let summed = (second << FIXED_POINT_SHIFT).div_euclid(&first) * old;
    big_to_i64(&(summed >> FIXED_POINT_SHIFT))
}

/// Limits a retargeted price to within `max_retarget` times `old_diff` in
/// either direction. A zero result falls to the lower bound.
pub fn clamp_retarget(old_diff: i64, next_diff: i64, max_retarget: i64) -> i64 {
    if old_diff == 0 || max_retarget <= 0 {
        return next_diff;
    }
    if next_diff == 0 {
        old_diff / max_retarget
    } else if next_diff / old_diff > max_retarget - 1 {
        old_diff.saturating_mul(max_retarget)
    } else if old_diff / next_diff > max_retarget - 1 {
        old_diff / max_retarget
    } else {
        next_diff
    }
}
