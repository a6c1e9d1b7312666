//! Work and ticket price retargeting over the block tree.

use hxd_consensus::ChainParams;
use hxd_pow::difficulty::{
    big_to_compact, big_to_i64, compact_to_big, hash_to_big, WindowedRatio,
};
use hxd_pow::stake::{calc_next_stake_diff, clamp_retarget, merge_difficulty};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::index::NodeRef;
use crate::state::ChainError;

/// Required compact bits for the block after `prev` with the given
/// timestamp.
pub fn calc_next_required_difficulty(
    params: &ChainParams,
    prev: Option<NodeRef<'_>>,
    new_block_time: i64,
) -> u32 {
    let prev = match prev {
        Some(prev) => prev,
        None => return params.pow_limit_bits,
    };
    let next_height = prev.height + 1;

    if let Some(change) = params.algorithm_change {
        if next_height == change.height {
            return change.start_bits;
        }
    }

    if next_height % params.work_diff_window_size != 0 {
        if reduce_min_difficulty_active(params, next_height) {
            if new_block_time > prev.timestamp + params.min_diff_reduction_time {
                return params.pow_limit_bits;
            }
            return find_prev_test_net_difficulty(params, prev);
        }
        return prev.bits;
    }

    let old_target = compact_to_big(prev.bits);
    let factor = BigInt::from(params.retarget_adjustment_factor);
    let min_target = &old_target / &factor;
    let max_target = &old_target * &factor;
    let pow_limit = hash_to_big(&params.pow_limit);

    let mut ratio = WindowedRatio::new(params.work_diff_windows, params.work_diff_alpha);
    let nodes_to_traverse = params.work_diff_window_size * params.work_diff_windows;
    let mut old_node = prev;
    let mut recent_time = prev.timestamp;
    for i in 1..=nodes_to_traverse {
        if let Some(parent) = old_node.parent() {
            old_node = parent;
        }
        if i % params.work_diff_window_size == 0 {
            let older_time = old_node.timestamp;
            let elapsed = if window_is_neutral(params, old_node) {
                params.target_timespan
            } else {
                recent_time - older_time
            };
            ratio.push(elapsed, params.target_timespan);
            recent_time = older_time;
        }
    }

    let mut next_target = ratio.apply(&old_target);
    if old_target.is_zero() {
        hxd_log::log_warn!("previous block at height {} has a zero target", prev.height);
        next_target = pow_limit.clone();
    } else if next_target.is_zero() {
        next_target = pow_limit.clone();
    } else if next_target > max_target {
        next_target = max_target;
    } else if next_target < min_target {
        next_target = min_target;
    }

    if let Some(cap) = params.test_net_difficulty_cap {
        if next_height >= cap.height {
            let cap_target = compact_to_big(cap.bits);
            if next_target < cap_target {
                next_target = cap_target;
            }
        }
    }
    if next_target > pow_limit || next_target.is_negative() {
        next_target = pow_limit;
    }

    let next_bits = big_to_compact(&next_target);
    hxd_log::log_debug!(
        "work retarget at height {}: old bits {:#010x}, new bits {:#010x}",
        next_height,
        prev.bits,
        next_bits
    );
    next_bits
}

fn reduce_min_difficulty_active(params: &ChainParams, next_height: i64) -> bool {
    params.reduce_min_difficulty
        && params
            .reduce_min_difficulty_end_height
            .map_or(true, |end| next_height < end)
}

/// Windows that reach genesis, or blocks mined under a previous proof of
/// work algorithm, count as exactly on target.
fn window_is_neutral(params: &ChainParams, oldest: NodeRef<'_>) -> bool {
    oldest.height == 0
        || params
            .algorithm_change
            .is_some_and(|change| oldest.height < change.height)
}

/// Bits of the most recent block that did not use the minimum difficulty
/// exception, or the minimum difficulty when there is none.
fn find_prev_test_net_difficulty(params: &ChainParams, start: NodeRef<'_>) -> u32 {
    start
        .walk()
        .find(|node| {
            node.height % params.work_diff_window_size == 0 || node.bits != params.pow_limit_bits
        })
        .map_or(params.pow_limit_bits, |node| node.bits)
}

/// First height whose ticket price is retargeted. Before it staking is not
/// enabled or no ticket has matured, and the price is the minimum.
fn stake_diff_start_height(params: &ChainParams) -> i64 {
    params
        .stake_enabled_height
        .max(i64::from(params.coinbase_maturity) + 1)
}

/// Legacy ticket price: two exponentially weighted passes, one over the live
/// pool size and one over tickets bought per window, merged together.
pub fn calc_next_required_stake_difficulty_v1(
    params: &ChainParams,
    cur: Option<NodeRef<'_>>,
) -> i64 {
    let cur = match cur {
        Some(cur) if cur.height + 1 >= stake_diff_start_height(params) => cur,
        _ => return params.minimum_stake_diff,
    };

    let old_diff = cur.sbits;
    if (cur.height + 1) % params.stake_diff_window_size != 0 {
        return old_diff;
    }
    if old_diff == 0 {
        hxd_log::log_warn!("zero ticket price at height {}", cur.height);
        return params.minimum_stake_diff;
    }

    let max_retarget = params.retarget_adjustment_factor;
    let window_size = params.stake_diff_window_size;
    let nodes_to_traverse = window_size * params.stake_diff_windows;
    let old_diff_big = BigInt::from(old_diff);

    let target_pool = i64::from(params.tickets_per_block) * i64::from(params.ticket_pool_size);
    let pool_weight = i64::from(params.ticket_pool_size_weight);
    let mut pool_ratio = WindowedRatio::new(params.stake_diff_windows, params.stake_diff_alpha);
    let mut old_node = cur;
    for i in 0..nodes_to_traverse {
        if (i + 1) % window_size == 0 {
            let skewed = (i64::from(old_node.pool_size) - target_pool) * pool_weight + target_pool;
            pool_ratio.push(skewed.max(1), target_pool);
        }
        if i + 1 < nodes_to_traverse {
            if let Some(parent) = old_node.parent() {
                old_node = parent;
            }
        }
    }
    let next_pool = big_to_i64(&pool_ratio.apply(&old_diff_big));
    let next_pool = clamp_retarget(old_diff, next_pool, max_retarget);

    let target_window = window_size * i64::from(params.tickets_per_block);
    let mut fresh_ratio = WindowedRatio::new(params.stake_diff_windows, params.stake_diff_alpha);
    let mut window_fresh = 0i64;
    let mut old_node = cur;
    for i in 0..nodes_to_traverse {
        window_fresh += i64::from(old_node.fresh_stake);
        if (i + 1) % window_size == 0 {
            fresh_ratio.push(window_fresh.max(1), target_window);
            window_fresh = 0;
        }
        if i + 1 < nodes_to_traverse {
            if let Some(parent) = old_node.parent() {
                old_node = parent;
            }
        }
    }
    let next_fresh = big_to_i64(&fresh_ratio.apply(&old_diff_big));
    let next_fresh = clamp_retarget(old_diff, next_fresh, max_retarget);

    let merged = merge_difficulty(old_diff, next_pool, next_fresh);
    let next = clamp_retarget(old_diff, merged, max_retarget).max(params.minimum_stake_diff);
    hxd_log::log_debug!(
        "legacy ticket price at height {}: pool {}, fresh {}, next {}",
        cur.height + 1,
        next_pool,
        next_fresh,
        next
    );
    next
}

/// Tickets bought in up to `count` blocks ending at `start`.
fn sum_purchased_tickets(start: Option<NodeRef<'_>>, count: i64) -> i64 {
    let count = usize::try_from(count).unwrap_or(0);
    start
        .into_iter()
        .flat_map(|node| node.walk())
        .take(count)
        .map(|node| i64::from(node.fresh_stake))
        .sum()
}

/// Live plus immature tickets as seen by the block at `node`.
fn pool_size_all(params: &ChainParams, node: Option<NodeRef<'_>>) -> i64 {
    let live = node.map_or(0, |node| i64::from(node.pool_size));
    live + sum_purchased_tickets(node, i64::from(params.ticket_maturity))
}

/// DCP0001 ticket price for the block after `cur`.
pub fn calc_next_required_stake_difficulty_v2(
    params: &ChainParams,
    cur: Option<NodeRef<'_>>,
) -> i64 {
    let next_height = cur.map_or(0, |cur| cur.height + 1);
    let cur = match cur {
        Some(cur) if next_height >= stake_diff_start_height(params) => cur,
        _ => return params.minimum_stake_diff,
    };

    let interval = params.stake_diff_window_size;
    let cur_diff = cur.sbits;
    if next_height % interval != 0 {
        return cur_diff;
    }

    // Values for a retarget are always read from the block before it.
    let prev_retarget = cur.ancestor(next_height - interval - 1);
    let prev_pool_size_all = pool_size_all(params, prev_retarget);
    if prev_pool_size_all == 0 {
        return cur_diff;
    }

    let cur_pool_size_all = pool_size_all(params, Some(cur));
    let next = calc_next_stake_diff(
        params,
        next_height,
        cur_diff,
        prev_pool_size_all,
        cur_pool_size_all,
    );
    hxd_log::log_debug!(
        "ticket price at height {}: pool {} -> {}, price {} -> {}",
        next_height,
        prev_pool_size_all,
        cur_pool_size_all,
        cur_diff,
        next
    );
    next
}

/// Chooses the ticket price algorithm active at the next height.
pub fn calc_next_required_stake_difficulty(
    params: &ChainParams,
    cur: Option<NodeRef<'_>>,
) -> i64 {
    let next_height = cur.map_or(0, |cur| cur.height + 1);
    match params.stake_diff_v2_height {
        Some(activation) if next_height < activation => {
            calc_next_required_stake_difficulty_v1(params, cur)
        }
        _ => calc_next_required_stake_difficulty_v2(params, cur),
    }
}

/// Projects the DCP0001 ticket price at the next retarget boundary assuming
/// `new_tickets` more purchases (or the most possible with `use_max_tickets`)
/// in the blocks left in the current interval.
pub fn estimate_next_stake_difficulty(
    params: &ChainParams,
    cur: Option<NodeRef<'_>>,
    new_tickets: i64,
    use_max_tickets: bool,
) -> Result<i64, ChainError> {
    let cur_height = cur.map_or(0, |cur| cur.height);
    let ticket_maturity = i64::from(params.ticket_maturity);
    let interval = params.stake_diff_window_size;
    let blocks_until_retarget = interval - cur_height % interval;
    let next_retarget_height = cur_height + blocks_until_retarget;

    let max_fresh_per_block = i64::from(params.max_fresh_stake_per_block);
    let max_remaining_tickets = (blocks_until_retarget - 1) * max_fresh_per_block;
    if new_tickets > max_remaining_tickets {
        return Err(ChainError::InvalidEstimationRequest {
            requested: new_tickets,
            max: max_remaining_tickets,
        });
    }

    let cur = match cur {
        Some(cur) if next_retarget_height >= stake_diff_start_height(params) => cur,
        _ => return Ok(params.minimum_stake_diff),
    };

    let prev_retarget = cur.ancestor(next_retarget_height - interval - 1);
    let prev_pool_size_all = pool_size_all(params, prev_retarget);
    let cur_diff = cur.sbits;
    if prev_pool_size_all == 0 {
        return Ok(cur_diff);
    }

    // Tickets bought above this height are still immature in the block
    // before the retarget.
    let maturity_floor = next_retarget_height - ticket_maturity - 1;
    let mut immature = 0;
    if cur_height > maturity_floor {
        immature = sum_purchased_tickets(Some(cur), cur_height - maturity_floor);
    }

    // Known tickets that become live before the retarget. A ticket bought at
    // height h is live from h + maturity + 1.
    let mut maturing = 0;
    let last_maturing_height = (maturity_floor - 1).min(cur_height);
    let first_maturing_height = cur_height - ticket_maturity;
    if last_maturing_height >= first_maturing_height {
        maturing = sum_purchased_tickets(
            cur.ancestor(last_maturing_height),
            last_maturing_height - first_maturing_height + 1,
        );
    }

    // Pending purchases fill the latest blocks first.
    let pending = if use_max_tickets {
        max_remaining_tickets
    } else {
        new_tickets.max(0)
    };
    let immature_blocks = (next_retarget_height - 1 - cur_height.max(maturity_floor)).max(0);
    let pending_immature = pending.min(immature_blocks * max_fresh_per_block);
    let maturing_blocks = (maturity_floor - 1 - cur_height).max(0);
    let pending_maturing = (pending - pending_immature).min(maturing_blocks * max_fresh_per_block);
    immature += pending_immature;
    maturing += pending_maturing;

    let voting_blocks =
        (next_retarget_height - 1 - cur_height.max(params.stake_validation_height - 1)).max(0);
    let pending_votes = voting_blocks * i64::from(params.tickets_per_block);

    let estimated_pool = i64::from(cur.pool_size) + maturing - pending_votes;
    let estimated_pool_size_all = estimated_pool + immature;
    Ok(calc_next_stake_diff(
        params,
        next_retarget_height,
        cur_diff,
        prev_pool_size_all,
        estimated_pool_size_all,
    ))
}
