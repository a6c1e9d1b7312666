//! Compact target arithmetic and the closed-form ticket price rules.

pub mod difficulty;
pub mod stake;

pub use difficulty::CompactError;
