use hxd_consensus::Hash256;
use sha2::{Digest, Sha256};

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Display form of a hash: byte-reversed hex, as block explorers print it.
pub fn hash_to_hex(hash: &Hash256) -> String {
    hash.iter().rev().map(|byte| format!("{byte:02x}")).collect()
}
