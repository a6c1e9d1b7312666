//! Block header type and its consensus serialization.

pub mod block;
pub mod encoding;
pub mod hash;

pub use block::{genesis_header, BlockHeader, HEADER_SIZE};
pub use hash::{hash_to_hex, sha256d};
