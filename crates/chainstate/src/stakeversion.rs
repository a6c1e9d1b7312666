//! Stake version voting.
//!
//! Votes and header stake versions are tallied over fixed intervals of
//! `stake_version_interval` blocks that start at the stake validation
//! height. Results are memoized by the hash of the last block of the
//! interval they were computed over; that hash commits to the full ancestry,
//! so an entry can never go stale after a reorganization.

use std::collections::{BTreeMap, HashMap};

use hxd_consensus::{ChainParams, Hash256};
use hxd_primitives::hash_to_hex;

use crate::index::NodeRef;

/// Minimum block version counted by the header upgrade check.
const STAKE_VERSION_BLOCK_VERSION: i32 = 3;

/// Memoized stake version results. Only touched while the chain state lock
/// is held for writing.
#[derive(Default)]
pub struct StakeVersionCaches {
    voter_majority: HashMap<(u32, Hash256), bool>,
    stake_majority: HashMap<(u32, Hash256), bool>,
    prior_stake_version: HashMap<Hash256, u32>,
    voter_version_interval: HashMap<Hash256, Option<u32>>,
    stake_version: HashMap<Hash256, u32>,
}

impl StakeVersionCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.voter_majority.len()
            + self.stake_majority.len()
            + self.prior_stake_version.len()
            + self.voter_version_interval.len()
            + self.stake_version.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last height of the interval completed before the block at `height`.
pub fn calc_want_height(stake_validation_height: i64, interval: i64, height: i64) -> i64 {
    let interval_offset = stake_validation_height % interval;
    let adjusted_height = height - interval_offset - 1;
    (adjusted_height - ((adjusted_height + 1) % interval)) + interval_offset
}

pub struct StakeVersions<'a> {
    params: &'a ChainParams,
    caches: &'a mut StakeVersionCaches,
}

impl<'a> StakeVersions<'a> {
    pub fn new(params: &'a ChainParams, caches: &'a mut StakeVersionCaches) -> Self {
        Self { params, caches }
    }

    fn majority_threshold(&self, total: i64) -> i64 {
        self.params.stake_majority_threshold(total)
    }

    /// Last block of the most recently completed interval as seen by the
    /// block after `prev`, or `None` until the first interval has passed.
    pub fn find_stake_version_prior_node<'t>(&self, prev: NodeRef<'t>) -> Option<NodeRef<'t>> {
        let svh = self.params.stake_validation_height;
        let svi = self.params.stake_version_interval;
        let next_height = prev.height + 1;
        if next_height < svh + svi {
            return None;
        }
        prev.ancestor(calc_want_height(svh, svi, next_height))
    }

    /// Whether at least the majority threshold of votes cast in the last
    /// completed interval carry `min_ver` or newer.
    pub fn is_voter_majority_version(&mut self, min_ver: u32, prev: NodeRef<'_>) -> bool {
        let node = match self.find_stake_version_prior_node(prev) {
            Some(node) => node,
            None => return min_ver == 0,
        };

        let key = (min_ver, node.hash);
        if let Some(result) = self.caches.voter_majority.get(&key) {
            return *result;
        }

        let mut total_votes = 0i64;
        let mut version_count = 0i64;
        for block in node.walk().take(self.interval_len()) {
            total_votes += block.votes.len() as i64;
            version_count += block
                .votes
                .iter()
                .filter(|vote| vote.version >= min_ver)
                .count() as i64;
        }

        let result = version_count >= self.majority_threshold(total_votes);
        hxd_log::log_trace!(
            "voter majority v{} at {}: {}/{} votes -> {}",
            min_ver,
            hash_to_hex(&node.hash),
            version_count,
            total_votes,
            result
        );
        self.caches.voter_majority.insert(key, result);
        result
    }

    /// Whether the majority threshold of headers in the last completed
    /// interval declare stake version `min_ver` or newer.
    pub fn is_stake_majority_version(&mut self, min_ver: u32, prev: NodeRef<'_>) -> bool {
        let node = match self.find_stake_version_prior_node(prev) {
            Some(node) => node,
            None => return min_ver == 0,
        };

        let key = (min_ver, node.hash);
        if let Some(result) = self.caches.stake_majority.get(&key) {
            return *result;
        }

        let version_count = node
            .walk()
            .take(self.interval_len())
            .filter(|block| block.stake_version >= min_ver)
            .count() as i64;
        let result =
            version_count >= self.majority_threshold(self.params.stake_version_interval);
        self.caches.stake_majority.insert(key, result);
        result
    }

    /// Header stake version held by a majority over the last completed
    /// interval, or zero.
    pub fn calc_prior_stake_version(&mut self, prev: NodeRef<'_>) -> u32 {
        let node = match self.find_stake_version_prior_node(prev) {
            Some(node) => node,
            None => return 0,
        };
        if let Some(version) = self.caches.prior_stake_version.get(&node.hash) {
            return *version;
        }

        let mut versions: BTreeMap<u32, i64> = BTreeMap::new();
        for block in node.walk().take(self.interval_len()) {
            *versions.entry(block.stake_version).or_default() += 1;
        }
        let required = self.majority_threshold(self.params.stake_version_interval);
        let version = majority_version(&versions, required).unwrap_or(0);
        self.caches.prior_stake_version.insert(node.hash, version);
        version
    }

    /// Vote version held by a majority of the votes in the interval that
    /// ends at `node`. `node` must be the last block of an interval.
    pub fn calc_voter_version_interval(&mut self, node: NodeRef<'_>) -> Option<u32> {
        let svh = self.params.stake_validation_height;
        let svi = self.params.stake_version_interval;
        if node.height != calc_want_height(svh, svi, node.height + 1) {
            hxd_log::log_warn!(
                "voter version requested for block {} at height {} which does not end an interval",
                hash_to_hex(&node.hash),
                node.height
            );
            return None;
        }
        if let Some(version) = self.caches.voter_version_interval.get(&node.hash) {
            return *version;
        }

        let mut versions: BTreeMap<u32, i64> = BTreeMap::new();
        let mut total_votes = 0i64;
        for block in node
            .walk()
            .take(self.interval_len())
            .take_while(|block| block.height >= svh)
        {
            total_votes += block.votes.len() as i64;
            for vote in &block.votes {
                *versions.entry(vote.version).or_default() += 1;
            }
        }

        let version = majority_version(&versions, self.majority_threshold(total_votes));
        self.caches.voter_version_interval.insert(node.hash, version);
        version
    }

    /// Most recent interval-majority vote version at or before the interval
    /// completed for the block after `prev`, with the last block of that
    /// interval.
    pub fn calc_voter_version<'t>(&mut self, prev: NodeRef<'t>) -> Option<(u32, NodeRef<'t>)> {
        let svh = self.params.stake_validation_height;
        let svi = self.params.stake_version_interval;
        let mut node = prev.ancestor(calc_want_height(svh, svi, prev.height + 1));
        while let Some(current) = node {
            if current.height < svh {
                break;
            }
            if let Some(version) = self.calc_voter_version_interval(current) {
                return Some((version, current));
            }
            node = current.relative_ancestor(svi);
        }
        None
    }

    /// Whether at least `num_required` of the last
    /// `block_upgrade_num_to_check` blocks ending at `start` have a block
    /// version of `min_ver` or newer.
    pub fn is_majority_version(
        &self,
        min_ver: i32,
        start: Option<NodeRef<'_>>,
        num_required: u64,
    ) -> bool {
        let found = start
            .into_iter()
            .flat_map(|node| node.walk())
            .take(self.params.block_upgrade_num_to_check as usize)
            .filter(|node| node.block_version >= min_ver)
            .take(num_required as usize)
            .count() as u64;
        found >= num_required
    }

    /// Stake version the block after `prev` must declare.
    ///
    /// This is the latest majority vote version, unless the header stake
    /// versions of the last interval already locked in a newer one; the
    /// agreed version never goes backwards once a majority of headers carry
    /// it.
    pub fn calc_stake_version(&mut self, prev: NodeRef<'_>) -> u32 {
        let (mut version, node) = match self.calc_voter_version(prev) {
            Some((version, node)) if version != 0 => (version, node),
            _ => return 0,
        };

        if let Some(version) = self.caches.stake_version.get(&node.hash) {
            hxd_log::log_trace!("stake version cache hit at {}", hash_to_hex(&node.hash));
            return *version;
        }

        let svh = self.params.stake_validation_height;
        let svi = self.params.stake_version_interval;
        let start = node.ancestor(calc_want_height(svh, svi, node.height) + 1);
        if !self.is_majority_version(
            STAKE_VERSION_BLOCK_VERSION,
            start,
            self.params.block_reject_num_required,
        ) {
            self.caches.stake_version.insert(node.hash, 0);
            return 0;
        }

        if self.is_stake_majority_version(version, node) {
            let prior = self.calc_prior_stake_version(node);
            if version <= prior {
                version = prior;
            }
        }

        hxd_log::log_debug!(
            "stake version {} for interval ending at height {}",
            version,
            node.height
        );
        self.caches.stake_version.insert(node.hash, version);
        version
    }

    fn interval_len(&self) -> usize {
        usize::try_from(self.params.stake_version_interval).unwrap_or(0)
    }
}

/// Highest version whose count reaches `required`.
fn majority_version(versions: &BTreeMap<u32, i64>, required: i64) -> Option<u32> {
    versions
        .iter()
        .rev()
        .find(|(_, count)| **count >= required)
        .map(|(version, _)| *version)
}
