//! Chain state facade shared by the node's threads.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hxd_consensus::{ChainParams, Hash256};
use hxd_pow::difficulty::calc_easiest_difficulty;
use hxd_primitives::{genesis_header, hash_to_hex, BlockHeader};
use primitive_types::U256;

use crate::blocknode::{BlockNode, VoteVersion};
use crate::difficulty;
use crate::index::{BlockIndex, BlockTree, NodeRef};
use crate::stakeversion::{StakeVersionCaches, StakeVersions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    UnknownBlock(Hash256),
    InvalidEstimationRequest { requested: i64, max: i64 },
    MissingParent(Hash256),
    DuplicateBlock(Hash256),
    InvalidHeight { expected: i64, got: i64 },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::UnknownBlock(hash) => write!(f, "block {} is not known", hash_to_hex(hash)),
            ChainError::InvalidEstimationRequest { requested, max } => write!(
                f,
                "unable to estimate ticket price with {requested} new tickets, at most {max} can still be purchased"
            ),
            ChainError::MissingParent(hash) => {
                write!(f, "parent block {} is not known", hash_to_hex(hash))
            }
            ChainError::DuplicateBlock(hash) => {
                write!(f, "block {} is already indexed", hash_to_hex(hash))
            }
            ChainError::InvalidHeight { expected, got } => {
                write!(f, "block height {got} does not follow parent, expected {expected}")
            }
        }
    }
}

impl std::error::Error for ChainError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: i64,
    pub work_sum: U256,
}

impl From<NodeRef<'_>> for ChainTip {
    fn from(node: NodeRef<'_>) -> Self {
        Self {
            hash: node.hash,
            height: node.height,
            work_sum: node.work_sum,
        }
    }
}

/// Block index, chain parameters and the chain state lock.
///
/// The chain state lock owns the stake version caches. Writers (header
/// insertion and stake version queries) hold it exclusively; difficulty
/// queries share it. It is always taken before the index lock.
pub struct ChainState {
    params: ChainParams,
    index: BlockIndex,
    chain_lock: RwLock<StakeVersionCaches>,
}

impl ChainState {
    /// Empty chain state. The first header added must be a genesis block.
    pub fn new(params: ChainParams) -> Self {
        Self {
            params,
            index: BlockIndex::new(),
            chain_lock: RwLock::new(StakeVersionCaches::new()),
        }
    }

    /// Chain state seeded with the network's genesis header.
    pub fn with_genesis(params: ChainParams) -> Result<Self, ChainError> {
        let genesis = genesis_header(&params);
        let state = Self::new(params);
        state.add_header(&genesis, &[])?;
        Ok(state)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Direct access to the index for read-only inspection that does not
    /// need the chain state lock.
    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, StakeVersionCaches> {
        self.chain_lock.read().expect("chain state lock")
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, StakeVersionCaches> {
        self.chain_lock.write().expect("chain state lock")
    }

    pub fn add_header(
        &self,
        header: &BlockHeader,
        votes: &[VoteVersion],
    ) -> Result<Hash256, ChainError> {
        let _chain = self.write_chain();
        let node = BlockNode::from_header(header, votes);
        let hash = node.hash;
        self.index.add_node(node)?;
        Ok(hash)
    }

    pub fn lookup_node(&self, hash: &Hash256) -> Option<BlockNode> {
        self.index.lookup_node(hash)
    }

    pub fn header(&self, hash: &Hash256) -> Result<BlockHeader, ChainError> {
        self.lookup_node(hash)
            .map(|node| node.header())
            .ok_or(ChainError::UnknownBlock(*hash))
    }

    pub fn chain_tips(&self) -> Vec<ChainTip> {
        let tree = self.index.read();
        tree.chain_tips().into_iter().map(ChainTip::from).collect()
    }

    pub fn best_chain_tip(&self) -> Option<ChainTip> {
        let tree = self.index.read();
        tree.best_chain_tip().map(ChainTip::from)
    }

    /// Runs `f` against the node for `hash` under the shared chain state lock.
    fn with_node<T>(
        &self,
        hash: &Hash256,
        f: impl FnOnce(&BlockTree, NodeRef<'_>) -> T,
    ) -> Result<T, ChainError> {
        let _chain = self.read_chain();
        let tree = self.index.read();
        let node = tree
            .lookup_node(hash)
            .ok_or(ChainError::UnknownBlock(*hash))?;
        Ok(f(&tree, node))
    }

    /// Runs `f` with the stake version engine under the exclusive chain
    /// state lock.
    fn with_stake_versions<T>(
        &self,
        hash: &Hash256,
        f: impl FnOnce(&mut StakeVersions<'_>, NodeRef<'_>) -> T,
    ) -> Result<T, ChainError> {
        let mut caches = self.write_chain();
        let tree = self.index.read();
        let node = tree
            .lookup_node(hash)
            .ok_or(ChainError::UnknownBlock(*hash))?;
        let mut versions = StakeVersions::new(&self.params, &mut caches);
        Ok(f(&mut versions, node))
    }

    pub fn calc_past_median_time(&self, hash: &Hash256) -> Result<i64, ChainError> {
        self.with_node(hash, |tree, node| tree.calc_past_median_time(node))
    }

    /// Compact bits required for a block built on `hash` with `timestamp`.
    pub fn calc_next_required_difficulty(
        &self,
        hash: &Hash256,
        timestamp: i64,
    ) -> Result<u32, ChainError> {
        self.with_node(hash, |_, node| {
            difficulty::calc_next_required_difficulty(&self.params, Some(node), timestamp)
        })
    }

    pub fn calc_next_required_stake_difficulty(&self, hash: &Hash256) -> Result<i64, ChainError> {
        self.with_node(hash, |_, node| {
            difficulty::calc_next_required_stake_difficulty(&self.params, Some(node))
        })
    }

    pub fn estimate_next_stake_difficulty(
        &self,
        hash: &Hash256,
        new_tickets: i64,
        use_max_tickets: bool,
    ) -> Result<i64, ChainError> {
        self.with_node(hash, |_, node| {
            difficulty::estimate_next_stake_difficulty(
                &self.params,
                Some(node),
                new_tickets,
                use_max_tickets,
            )
        })?
    }

    /// Easiest compact bits a block `duration` seconds after one with `bits`
    /// could legitimately require.
    pub fn calc_easiest_difficulty(&self, bits: u32, duration: i64) -> u32 {
        calc_easiest_difficulty(&self.params, bits, duration)
    }

    pub fn calc_stake_version(&self, hash: &Hash256) -> Result<u32, ChainError> {
        self.with_stake_versions(hash, |versions, node| versions.calc_stake_version(node))
    }

    pub fn is_voter_majority_version(
        &self,
        min_ver: u32,
        hash: &Hash256,
    ) -> Result<bool, ChainError> {
        self.with_stake_versions(hash, |versions, node| {
            versions.is_voter_majority_version(min_ver, node)
        })
    }

    pub fn is_stake_majority_version(
        &self,
        min_ver: u32,
        hash: &Hash256,
    ) -> Result<bool, ChainError> {
        self.with_stake_versions(hash, |versions, node| {
            versions.is_stake_majority_version(min_ver, node)
        })
    }

    pub fn calc_prior_stake_version(&self, hash: &Hash256) -> Result<u32, ChainError> {
        self.with_stake_versions(hash, |versions, node| versions.calc_prior_stake_version(node))
    }

    /// Number of memoized stake version results.
    pub fn stake_version_cache_len(&self) -> usize {
        self.read_chain().len()
    }
}
