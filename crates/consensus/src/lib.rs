//! Consensus parameters, monetary units and the supply schedule.

pub mod money;
pub mod params;
pub mod subsidy;

pub use params::{
    chain_params, AlgorithmChange, ChainParams, DifficultyCap, Network, ParseNetworkError,
};
pub use subsidy::{calc_block_subsidy, estimate_supply};

pub type Hash256 = [u8; 32];
