use hxd_consensus::Hash256;
use hxd_pow::difficulty::calc_work;
use hxd_primitives::BlockHeader;
use primitive_types::U256;
use smallvec::SmallVec;

/// Position of a node in the block tree arena.
pub type NodeId = usize;

pub const STATUS_DATA_STORED: u8 = 1 << 0;
pub const STATUS_VALIDATED: u8 = 1 << 1;
pub const STATUS_VALIDATE_FAILED: u8 = 1 << 2;
pub const STATUS_INVALID_ANCESTOR: u8 = 1 << 3;
const STATUS_FAILED_MASK: u8 = STATUS_VALIDATE_FAILED | STATUS_INVALID_ANCESTOR;

/// Version and vote bits of a single vote cast in a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoteVersion {
    pub version: u32,
    pub bits: u16,
}

pub type Votes = SmallVec<[VoteVersion; 5]>;

#[derive(Clone, Debug)]
pub struct BlockNode {
    pub hash: Hash256,
    pub height: i64,
    pub parent: Option<NodeId>,
    pub(crate) skip: Option<NodeId>,
    /// Total work of the chain ending at this node.
    pub work_sum: U256,

    pub block_version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub stake_root: Hash256,
    pub vote_bits: u16,
    pub final_state: [u8; 6],
    pub voters: u16,
    pub fresh_stake: u8,
    pub revocations: u8,
    pub pool_size: u32,
    pub bits: u32,
    pub sbits: i64,
    pub timestamp: i64,
    pub size: u32,
    pub nonce: u32,
    pub extra_data: [u8; 32],
    pub stake_version: u32,

    pub votes: Votes,
    pub status: u8,
}

impl BlockNode {
    /// Builds an unlinked node. Linking to the parent and accumulating work
    /// happens when the node is added to a tree.
    pub fn from_header(header: &BlockHeader, votes: &[VoteVersion]) -> Self {
        Self {
            hash: header.hash(),
            height: i64::from(header.height),
            parent: None,
            skip: None,
            work_sum: calc_work(header.bits),
            block_version: header.version,
            prev_hash: header.prev_block,
            merkle_root: header.merkle_root,
            stake_root: header.stake_root,
            vote_bits: header.vote_bits,
            final_state: header.final_state,
            voters: header.voters,
            fresh_stake: header.fresh_stake,
            revocations: header.revocations,
            pool_size: header.pool_size,
            bits: header.bits,
            sbits: header.sbits,
            timestamp: i64::from(header.timestamp),
            size: header.size,
            nonce: header.nonce,
            extra_data: header.extra_data,
            stake_version: header.stake_version,
            votes: votes.iter().copied().collect(),
            status: 0,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            version: self.block_version,
            prev_block: self.prev_hash,
            merkle_root: self.merkle_root,
            stake_root: self.stake_root,
            vote_bits: self.vote_bits,
            final_state: self.final_state,
            voters: self.voters,
            fresh_stake: self.fresh_stake,
            revocations: self.revocations,
            pool_size: self.pool_size,
            bits: self.bits,
            sbits: self.sbits,
            height: self.height as u32,
            size: self.size,
            timestamp: self.timestamp as u32,
            nonce: self.nonce,
            extra_data: self.extra_data,
            stake_version: self.stake_version,
        }
    }

    pub fn has_data(&self) -> bool {
        (self.status & STATUS_DATA_STORED) != 0
    }

    pub fn is_validated(&self) -> bool {
        (self.status & STATUS_VALIDATED) != 0
    }

    pub fn is_failed(&self) -> bool {
        (self.status & STATUS_FAILED_MASK) != 0
    }
}
