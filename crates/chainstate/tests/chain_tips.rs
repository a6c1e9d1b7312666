use std::collections::HashSet;

use hxd_chainstate::ChainState;
use hxd_consensus::{chain_params, ChainParams, Hash256, Network};
use hxd_primitives::{genesis_header, BlockHeader};

fn extend(parent: &BlockHeader, count: usize, tag: u32) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut prev = parent.clone();
    for _ in 0..count {
        let mut header = prev.clone();
        header.prev_block = prev.hash();
        header.height = prev.height + 1;
        header.timestamp = prev.timestamp + 300;
        header.nonce = tag;
        headers.push(header.clone());
        prev = header;
    }
    headers
}

/// genesis -> 4 blocks; two 25 block branches fork off the third of those;
/// a 3 block branch forks off the next to last block of the first long
/// branch; two single blocks fork off genesis.
fn branches(params: &ChainParams) -> (BlockHeader, Vec<Vec<BlockHeader>>) {
    let genesis = genesis_header(params);
    let trunk = extend(&genesis, 4, 0);
    let long_a = extend(&trunk[2], 25, 1);
    let short = extend(&long_a[23], 3, 2);
    let long_b = extend(&trunk[2], 25, 3);
    let single_a = extend(&genesis, 1, 4);
    let single_b = extend(&genesis, 1, 5);
    (
        genesis,
        vec![trunk, long_a, short, long_b, single_a, single_b],
    )
}

fn tip_hashes(state: &ChainState) -> HashSet<Hash256> {
    state.chain_tips().into_iter().map(|tip| tip.hash).collect()
}

#[test]
fn six_branches_report_six_tips() {
    let params = chain_params(Network::Regnet);
    let (_, branches) = branches(&params);
    let expected: HashSet<Hash256> = branches
        .iter()
        .map(|branch| branch.last().expect("branch").hash())
        .collect();

    // Parents must be indexed first: trunk before both long branches, the
    // first long branch before the short one.
    let orders: [[usize; 6]; 4] = [
        [0, 1, 2, 3, 4, 5],
        [5, 4, 0, 3, 1, 2],
        [0, 3, 1, 4, 2, 5],
        [4, 0, 1, 2, 5, 3],
    ];
    for order in orders {
        let state = ChainState::with_genesis(params.clone()).expect("genesis");
        for branch in order {
            for header in &branches[branch] {
                state.add_header(header, &[]).expect("add header");
            }
        }
        let tips = state.chain_tips();
        assert_eq!(tips.len(), 6, "order {order:?}");
        assert_eq!(tip_hashes(&state), expected, "order {order:?}");
        for tip in &tips {
            let header = state.header(&tip.hash).expect("tip header");
            assert_eq!(i64::from(header.height), tip.height);
        }
    }
}

#[test]
fn best_tip_has_most_work() {
    let params = chain_params(Network::Regnet);
    let (_, branches) = branches(&params);
    let state = ChainState::with_genesis(params).expect("genesis");
    for branch in &branches {
        for header in branch {
            state.add_header(header, &[]).expect("add header");
        }
    }

    let best = state.best_chain_tip().expect("best tip");
    assert_eq!(best.hash, branches[2].last().expect("short branch").hash());
    assert_eq!(best.height, 30);
}

#[test]
fn fork_point_of_long_branches() {
    let params = chain_params(Network::Regnet);
    let (_, branches) = branches(&params);
    let state = ChainState::with_genesis(params).expect("genesis");
    for branch in &branches {
        for header in branch {
            state.add_header(header, &[]).expect("add header");
        }
    }

    let tree = state.index().read();
    let a = tree
        .lookup_node(&branches[2].last().expect("short").hash())
        .expect("a");
    let b = tree
        .lookup_node(&branches[3].last().expect("long").hash())
        .expect("b");
    let fork = tree.find_fork(a, b).expect("fork");
    assert_eq!(fork.hash, branches[0][2].hash());
    assert_eq!(fork.height, 3);
}

#[test]
fn duplicate_and_orphan_headers_are_rejected() {
    let params = chain_params(Network::Regnet);
    let (genesis, branches) = branches(&params);
    let state = ChainState::with_genesis(params).expect("genesis");

    assert!(state.add_header(&genesis, &[]).is_err());
    assert!(state.add_header(&branches[1][0], &[]).is_err());

    state.add_header(&branches[0][0], &[]).expect("first block");
    assert!(state.add_header(&branches[0][0], &[]).is_err());
    assert_eq!(state.index().len(), 2);
    assert_eq!(state.chain_tips().len(), 1);
}
