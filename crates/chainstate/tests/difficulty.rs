use hxd_chainstate::{ChainError, ChainState};
use hxd_consensus::{
    chain_params, AlgorithmChange, ChainParams, DifficultyCap, Hash256, Network,
};
use hxd_pow::difficulty::{big_to_compact, compact_to_big};
use hxd_primitives::{genesis_header, BlockHeader};
use num_bigint::BigInt;

const MAINNET_BITS: u32 = 0x1d00_ffff;

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn range(&mut self, low: u32, high: u32) -> u32 {
        low + ((self.next_u64() >> 33) as u32) % (high - low + 1)
    }
}

/// Builds a chain of `len` blocks including genesis. `shape` fills in the
/// fields under test for each non-genesis height.
fn build_chain(
    params: &ChainParams,
    len: u32,
    mut shape: impl FnMut(u32, &mut BlockHeader),
) -> (ChainState, Vec<Hash256>) {
    let mut prev = genesis_header(params);
    let state = ChainState::with_genesis(params.clone()).expect("genesis");
    let mut hashes = vec![prev.hash()];
    for height in 1..len {
        let mut header = prev.clone();
        header.prev_block = prev.hash();
        header.height = height;
        shape(height, &mut header);
        hashes.push(state.add_header(&header, &[]).expect("add header"));
        prev = header;
    }
    (state, hashes)
}

fn work_chain(params: &ChainParams, spacing: impl Fn(u32) -> u32) -> (ChainState, Vec<Hash256>) {
    let genesis_time = params.genesis_time;
    build_chain(params, 64, |height, header| {
        header.bits = MAINNET_BITS;
        header.timestamp = genesis_time + spacing(height);
    })
}

fn next_bits(state: &ChainState, hashes: &[Hash256]) -> u32 {
    let tip = hashes.last().expect("tip");
    let time = i64::from(state.header(tip).expect("tip header").timestamp) + 1;
    state
        .calc_next_required_difficulty(tip, time)
        .expect("next bits")
}

#[test]
fn on_target_spacing_keeps_difficulty() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = work_chain(&params, |height| height);
    let bits = next_bits(&state, &hashes);
    assert_eq!(bits, MAINNET_BITS);
    assert_eq!(next_bits(&state, &hashes), bits);
}

#[test]
fn fast_blocks_halve_the_target() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = work_chain(&params, |height| height / 2);
    let expected = big_to_compact(&(compact_to_big(MAINNET_BITS) / BigInt::from(2)));
    assert_eq!(expected, 0x1c7f_ff80);
    assert_eq!(next_bits(&state, &hashes), expected);
}

#[test]
fn slow_blocks_are_clamped() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = work_chain(&params, |height| height * 10);
    assert_eq!(next_bits(&state, &hashes), 0x1d03_fffc);
}

#[test]
fn difficulty_cap_bounds_fast_blocks() {
    let mut params = chain_params(Network::Simnet);
    params.test_net_difficulty_cap = Some(DifficultyCap {
        height: 0,
        bits: MAINNET_BITS,
    });
    let (state, hashes) = work_chain(&params, |height| height / 2);
    assert_eq!(next_bits(&state, &hashes), MAINNET_BITS);
}

#[test]
fn off_boundary_blocks_keep_parent_bits() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = work_chain(&params, |height| height * 10);
    let parent = hashes[hashes.len() - 2];
    assert_eq!(
        state.calc_next_required_difficulty(&parent, 0).expect("bits"),
        MAINNET_BITS
    );
}

/// Target `old` scaled by the weighted mean of four windows weighted 16, 8,
/// 4 and 2, given each window's ratio in halves.
fn windowed_bits(half_ratios: [i64; 4]) -> u32 {
    let weighted: i64 = half_ratios
        .iter()
        .zip([16i64, 8, 4, 2])
        .map(|(ratio, weight)| ratio * weight)
        .sum();
    let mean = (BigInt::from(weighted) << 31) / BigInt::from(30);
    big_to_compact(&((mean * compact_to_big(MAINNET_BITS)) >> 32))
}

#[test]
fn windows_reaching_genesis_are_on_target() {
    let params = chain_params(Network::Simnet);
    let genesis_time = params.genesis_time;
    let (state, hashes) = build_chain(&params, 16, |height, header| {
        header.bits = MAINNET_BITS;
        header.timestamp = genesis_time + height / 2;
    });
    // Only the most recent window ran fast, the rest start at genesis.
    let expected = windowed_bits([1, 2, 2, 2]);
    assert_ne!(expected, 0x1c7f_ff80);
    assert_eq!(next_bits(&state, &hashes), expected);
}

#[test]
fn windows_before_algorithm_change_are_on_target() {
    let mut params = chain_params(Network::Simnet);
    params.algorithm_change = Some(AlgorithmChange {
        height: 40,
        start_bits: MAINNET_BITS,
    });
    let (state, hashes) = work_chain(&params, |height| height / 2);
    // Windows ending at 55 and 47 ran fast; those reaching 39 and 31 predate
    // the change.
    assert_eq!(next_bits(&state, &hashes), windowed_bits([1, 1, 2, 2]));

    params.algorithm_change = None;
    let (state, hashes) = work_chain(&params, |height| height / 2);
    assert_eq!(next_bits(&state, &hashes), windowed_bits([1, 1, 1, 1]));
}

#[test]
fn random_spacing_stays_within_adjustment_factor() {
    let params = chain_params(Network::Simnet);
    let old = compact_to_big(MAINNET_BITS);
    let factor = BigInt::from(params.retarget_adjustment_factor);
    let lower = compact_to_big(big_to_compact(&(&old / &factor)));
    let upper = &old * &factor;

    for seed in 0..16u64 {
        let mut rng = Lcg::new(seed);
        let mut time = params.genesis_time;
        let (state, hashes) = build_chain(&params, 64, |_, header| {
            time += rng.range(1, 5);
            header.bits = MAINNET_BITS;
            header.timestamp = time;
        });
        let target = compact_to_big(next_bits(&state, &hashes));
        assert!(target >= lower, "seed {seed}");
        assert!(target <= upper, "seed {seed}");
    }
}

fn stake_chain(
    params: &ChainParams,
    len: u32,
    pool_size: impl Fn(u32) -> u32,
    fresh: impl Fn(u32) -> u8,
) -> (ChainState, Vec<Hash256>) {
    let genesis_time = params.genesis_time;
    build_chain(params, len, |height, header| {
        header.timestamp = genesis_time + height;
        header.pool_size = pool_size(height);
        header.fresh_stake = fresh(height);
        header.sbits = 50_000;
    })
}

fn legacy_params() -> ChainParams {
    let mut params = chain_params(Network::Simnet);
    params.stake_diff_v2_height = Some(1_000_000);
    params
}

#[test]
fn legacy_price_is_neutral_on_target() {
    let params = legacy_params();
    let (state, hashes) = stake_chain(&params, 72, |_| 320, |_| 5);
    let price = state
        .calc_next_required_stake_difficulty(&hashes[71])
        .expect("price");
    assert_eq!(price, 50_000);
}

#[test]
fn legacy_price_follows_pool_growth() {
    let params = legacy_params();
    let (state, hashes) = stake_chain(&params, 72, |_| 400, |_| 5);
    let price = state
        .calc_next_required_stake_difficulty(&hashes[71])
        .expect("price");
    assert_eq!(price, 100_000);

    // Off a retarget boundary the price carries over.
    let price = state
        .calc_next_required_stake_difficulty(&hashes[70])
        .expect("price");
    assert_eq!(price, 50_000);
}

#[test]
fn price_is_unchanged_at_target_pool_size() {
    let params = chain_params(Network::Simnet);
    assert_eq!(params.target_pool_size_all(), 400);
    let (state, hashes) = stake_chain(&params, 72, |_| 320, |_| 5);
    assert_eq!(
        state
            .calc_next_required_stake_difficulty(&hashes[71])
            .expect("price"),
        50_000
    );
}

#[test]
fn price_scales_with_pool_size() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = stake_chain(&params, 72, |_| 480, |_| 5);
    // Pool including immature tickets is 1.4 times the target.
    assert_eq!(
        state
            .calc_next_required_stake_difficulty(&hashes[71])
            .expect("price"),
        70_000
    );
}

#[test]
fn legacy_price_waits_for_staking() {
    let params = legacy_params();
    let (state, hashes) = stake_chain(&params, 24, |_| 320, |_| 20);
    assert_eq!(
        state
            .calc_next_required_stake_difficulty(&hashes[23])
            .expect("price"),
        params.minimum_stake_diff
    );

    let mut early = legacy_params();
    early.stake_enabled_height = 17;
    let (state, hashes) = stake_chain(&early, 24, |_| 320, |_| 20);
    assert!(
        state
            .calc_next_required_stake_difficulty(&hashes[23])
            .expect("price")
            > 50_000
    );
}

#[test]
fn price_waits_for_staking() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = stake_chain(&params, 24, |_| 480, |_| 5);
    assert_eq!(
        state
            .calc_next_required_stake_difficulty(&hashes[23])
            .expect("price"),
        params.minimum_stake_diff
    );

    let mut early = chain_params(Network::Simnet);
    early.stake_enabled_height = 17;
    let (state, hashes) = stake_chain(&early, 24, |_| 480, |_| 5);
    assert!(
        state
            .calc_next_required_stake_difficulty(&hashes[23])
            .expect("price")
            > 50_000
    );
}

#[test]
fn price_before_ticket_maturity_is_minimum() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = stake_chain(&params, 16, |_| 0, |_| 5);
    assert_eq!(
        state
            .calc_next_required_stake_difficulty(&hashes[15])
            .expect("price"),
        params.minimum_stake_diff
    );
}

#[test]
fn estimate_rejects_impossible_purchases() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = stake_chain(&params, 42, |_| 320, |_| 5);
    assert_eq!(
        state.estimate_next_stake_difficulty(&hashes[41], 121, false),
        Err(ChainError::InvalidEstimationRequest {
            requested: 121,
            max: 120
        })
    );
    assert!(state
        .estimate_next_stake_difficulty(&hashes[41], 120, false)
        .is_ok());
}

#[test]
fn estimate_grows_with_pending_tickets() {
    let params = chain_params(Network::Simnet);
    let (state, hashes) = stake_chain(&params, 42, |_| 320, |height| (height % 3) as u8);
    let none = state
        .estimate_next_stake_difficulty(&hashes[41], 0, false)
        .expect("estimate");
    let some = state
        .estimate_next_stake_difficulty(&hashes[41], 60, false)
        .expect("estimate");
    let all = state
        .estimate_next_stake_difficulty(&hashes[41], 120, false)
        .expect("estimate");
    let max = state
        .estimate_next_stake_difficulty(&hashes[41], 0, true)
        .expect("estimate");
    assert!(none <= some);
    assert!(some <= all);
    assert_eq!(all, max);
}

#[test]
fn estimate_before_retarget_matches_actual() {
    let params = chain_params(Network::Simnet);
    let cases: [(fn(u32) -> u32, fn(u32) -> u8); 3] = [
        (|_| 320, |_| 5),
        (|_| 480, |_| 5),
        (|height| 300 + height % 13, |height| ((height * 7) % 21) as u8),
    ];
    for (pool_size, fresh) in cases {
        let (state, hashes) = stake_chain(&params, 48, pool_size, fresh);
        let cur = &hashes[47];
        let actual = state
            .calc_next_required_stake_difficulty(cur)
            .expect("price");
        for use_max in [false, true] {
            assert_eq!(
                state
                    .estimate_next_stake_difficulty(cur, 0, use_max)
                    .expect("estimate"),
                actual
            );
        }
    }
}

#[test]
fn easiest_difficulty_never_exceeds_limit() {
    let params = chain_params(Network::Simnet);
    let state = ChainState::with_genesis(params.clone()).expect("genesis");
    let eased = state.calc_easiest_difficulty(MAINNET_BITS, 3_600);
    assert!(compact_to_big(eased) >= compact_to_big(MAINNET_BITS));
    assert!(compact_to_big(eased) <= compact_to_big(params.pow_limit_bits));
}

#[test]
fn estimate_matches_chain_that_buys_the_pending_tickets() {
    const CUR: u32 = 130;
    const RETARGET: u32 = 160;
    const MATURITY: u32 = 16;
    const STAKE_VALIDATION: u32 = 144;

    // Known purchases up to CUR, then the 400 tickets the estimate places:
    // 320 in the blocks still immature at the retarget and 80 in the latest
    // blocks whose tickets mature before it.
    fn fresh(height: u32) -> u8 {
        if height <= CUR {
            ((height * 7) % 21) as u8
        } else if (139..=142).contains(&height) || height >= STAKE_VALIDATION {
            20
        } else {
            0
        }
    }

    // Tickets bought at `h` go live at `h + MATURITY + 1`; from stake
    // validation on every block spends five.
    fn pool(height: u32) -> u32 {
        let matured: u32 = (1..=height.saturating_sub(MATURITY + 1))
            .map(|k| u32::from(fresh(k)))
            .sum();
        let voted = 5 * (height + 1).saturating_sub(STAKE_VALIDATION);
        300 + matured - voted
    }

    let mut params = chain_params(Network::Simnet);
    params.stake_diff_window_size = 32;
    assert_eq!(u32::from(params.ticket_maturity), MATURITY);
    assert_eq!(params.stake_validation_height, i64::from(STAKE_VALIDATION));

    let (state, hashes) = stake_chain(&params, RETARGET, pool, fresh);
    let estimate = state
        .estimate_next_stake_difficulty(&hashes[CUR as usize], 400, false)
        .expect("estimate");
    let actual = state
        .calc_next_required_stake_difficulty(&hashes[RETARGET as usize - 1])
        .expect("price");
    assert_eq!(estimate, actual);
    assert!(actual > 50_000);

    let without_pending = state
        .estimate_next_stake_difficulty(&hashes[CUR as usize], 0, false)
        .expect("estimate");
    assert!(without_pending < estimate);
}
