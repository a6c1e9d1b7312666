//! Block header type.

use hxd_consensus::{ChainParams, Hash256};

use crate::encoding::{decode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;

/// Serialized size of a header in bytes.
pub const HEADER_SIZE: usize = 180;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
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
    pub height: u32,
    pub size: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub extra_data: [u8; 32],
    pub stake_version: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    /// Block identity hash. This is not the proof-of-work hash.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_hash_le(&self.stake_root);
        encoder.write_u16_le(self.vote_bits);
        encoder.write_bytes(&self.final_state);
        encoder.write_u16_le(self.voters);
        encoder.write_u8(self.fresh_stake);
        encoder.write_u8(self.revocations);
        encoder.write_u32_le(self.pool_size);
        encoder.write_u32_le(self.bits);
        encoder.write_i64_le(self.sbits);
        encoder.write_u32_le(self.height);
        encoder.write_u32_le(self.size);
        encoder.write_u32_le(self.timestamp);
        encoder.write_u32_le(self.nonce);
        encoder.write_bytes(&self.extra_data);
        encoder.write_u32_le(self.stake_version);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            stake_root: decoder.read_hash_le()?,
            vote_bits: decoder.read_u16_le()?,
            final_state: decoder.read_fixed::<6>()?,
            voters: decoder.read_u16_le()?,
            fresh_stake: decoder.read_u8()?,
            revocations: decoder.read_u8()?,
            pool_size: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            sbits: decoder.read_i64_le()?,
            height: decoder.read_u32_le()?,
            size: decoder.read_u32_le()?,
            timestamp: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
            extra_data: decoder.read_fixed::<32>()?,
            stake_version: decoder.read_u32_le()?,
        })
    }
}

/// Genesis header for a network: minimum difficulty, minimum ticket price and
/// no stake activity.
pub fn genesis_header(params: &ChainParams) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: [0u8; 32],
        merkle_root: [0u8; 32],
        stake_root: [0u8; 32],
        vote_bits: 0,
        final_state: [0u8; 6],
        voters: 0,
        fresh_stake: 0,
        revocations: 0,
        pool_size: 0,
        bits: params.pow_limit_bits,
        sbits: params.minimum_stake_diff,
        height: 0,
        size: 0,
        timestamp: params.genesis_time,
        nonce: 0,
        extra_data: [0u8; 32],
        stake_version: 0,
    }
}
