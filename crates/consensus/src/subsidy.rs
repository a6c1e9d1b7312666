//! Block subsidy schedule and total supply estimation.

use crate::money::Amount;
use crate::params::ChainParams;

/// Full subsidy (work, stake and treasury portions combined) of the block at
/// `height`.
pub fn calc_block_subsidy(params: &ChainParams, height: i64) -> Amount {
    match height {
        h if h <= 0 => 0,
        1 => params.block_one_subsidy(),
        _ => {
            let reductions = height / params.subsidy_reduction_interval;
            let mut subsidy = params.base_subsidy;
            for _ in 0..reductions {
                subsidy = subsidy * params.mul_subsidy / params.div_subsidy;
            }
            subsidy
        }
    }
}

/// Estimated number of atoms in circulation once the block at `height` has
/// been mined. Used as an upper bound for the ticket price.
pub fn estimate_supply(params: &ChainParams, height: i64) -> Amount {
    if height <= 0 {
        return 0;
    }

    let interval = params.subsidy_reduction_interval;
    let mut supply = params.block_one_subsidy();
    let mut subsidy = params.base_subsidy;
    for _ in 0..height / interval {
        supply += interval * subsidy;
        subsidy = subsidy * params.mul_subsidy / params.div_subsidy;
    }
    supply += (1 + height % interval) * subsidy;

    // Genesis and block one were counted at the base rate above but have
    // their own amounts.
    supply - params.base_subsidy * 2
}
