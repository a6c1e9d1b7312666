//! Monetary units.

pub type Amount = i64;

/// Atoms per coin.
pub const COIN: Amount = 100_000_000;
