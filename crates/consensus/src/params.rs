//! Per-network chain parameters consumed by the retargeting and voting rules.

use crate::money::{Amount, COIN};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
    Regnet,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseNetworkError(pub String);

impl std::fmt::Display for ParseNetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown network '{}'", self.0)
    }
}

impl std::error::Error for ParseNetworkError {}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Simnet => "simnet",
            Network::Regnet => "regnet",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseNetworkError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" | "testnet3" => Ok(Network::Testnet),
            "simnet" | "sim" => Ok(Network::Simnet),
            "regnet" | "regtest" => Ok(Network::Regnet),
            other => Err(ParseNetworkError(other.to_string())),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = ParseNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::parse(s)
    }
}

/// Hard fork that switched the proof-of-work algorithm. The first block at
/// `height` must carry `start_bits`, and work retarget windows reaching below
/// `height` are treated as on-target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AlgorithmChange {
    pub height: i64,
    pub start_bits: u32,
}

/// Test network ceiling on work difficulty: once the next height reaches
/// `height` the required target is never below the target encoded by `bits`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DifficultyCap {
    pub height: i64,
    pub bits: u32,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub genesis_time: u32,

    /// Highest allowed proof-of-work target, little-endian.
    pub pow_limit: Hash256,
    pub pow_limit_bits: u32,
    pub reduce_min_difficulty: bool,
    /// Seconds without a block after which the minimum difficulty applies.
    pub min_diff_reduction_time: i64,
    /// First height at which the minimum difficulty reduction no longer applies.
    pub reduce_min_difficulty_end_height: Option<i64>,
    pub work_diff_alpha: i64,
    pub work_diff_window_size: i64,
    pub work_diff_windows: i64,
    /// Seconds a work retarget window is expected to take.
    pub target_timespan: i64,
    pub retarget_adjustment_factor: i64,
    pub algorithm_change: Option<AlgorithmChange>,
    pub test_net_difficulty_cap: Option<DifficultyCap>,

    pub base_subsidy: Amount,
    pub mul_subsidy: Amount,
    pub div_subsidy: Amount,
    pub subsidy_reduction_interval: i64,
    pub block_one_payout: Amount,

    pub minimum_stake_diff: i64,
    pub ticket_pool_size: u16,
    pub tickets_per_block: u16,
    pub ticket_maturity: u16,
    pub coinbase_maturity: u16,
    pub ticket_pool_size_weight: u16,
    pub stake_diff_alpha: i64,
    pub stake_diff_window_size: i64,
    pub stake_diff_windows: i64,
    pub max_fresh_stake_per_block: u8,
    pub stake_enabled_height: i64,
    pub stake_validation_height: i64,
    /// First height using the DCP0001 ticket price algorithm; `None` means
    /// the network never used the legacy algorithm.
    pub stake_diff_v2_height: Option<i64>,

    pub stake_version_interval: i64,
    pub stake_majority_multiplier: i32,
    pub stake_majority_divisor: i32,
    pub block_reject_num_required: u64,
    pub block_upgrade_num_to_check: u64,
}

impl ChainParams {
    /// Total amount paid out by the block at height one.
    pub fn block_one_subsidy(&self) -> Amount {
        self.block_one_payout
    }

    /// Number of votes required for a stake version supermajority over a full
    /// interval of blocks.
    pub fn stake_majority_threshold(&self, total: i64) -> i64 {
        total * i64::from(self.stake_majority_multiplier)
            / i64::from(self.stake_majority_divisor)
    }

    /// Target number of live plus immature tickets used by DCP0001.
    pub fn target_pool_size_all(&self) -> i64 {
        i64::from(self.tickets_per_block)
            * (i64::from(self.ticket_pool_size) + i64::from(self.ticket_maturity))
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

/// Parses a big-endian hex string into a little-endian 256-bit value.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }
    let padded = format!("{hex:0>64}");
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        *byte_out = u8::from_str_radix(&padded[i * 2..i * 2 + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_params(),
        Network::Testnet => testnet_params(),
        Network::Simnet => simnet_params(),
        Network::Regnet => regnet_params(),
    }
}

fn mainnet_params() -> ChainParams {
    ChainParams {
        genesis_time: 1_454_954_400,
        pow_limit: hash256_from_hex(
            "00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("mainnet pow limit"),
        pow_limit_bits: 0x1d00_ffff,
        reduce_min_difficulty: false,
        min_diff_reduction_time: 0,
        reduce_min_difficulty_end_height: None,
        work_diff_alpha: 1,
        work_diff_window_size: 144,
        work_diff_windows: 20,
        target_timespan: 300 * 144,
        retarget_adjustment_factor: 4,
        algorithm_change: None,
        test_net_difficulty_cap: None,
        base_subsidy: 3_119_582_664,
        mul_subsidy: 100,
        div_subsidy: 101,
        subsidy_reduction_interval: 6_144,
        block_one_payout: 1_680_000 * COIN,
        minimum_stake_diff: 2 * COIN,
        ticket_pool_size: 8_192,
        tickets_per_block: 5,
        ticket_maturity: 256,
        coinbase_maturity: 256,
        ticket_pool_size_weight: 4,
        stake_diff_alpha: 1,
        stake_diff_window_size: 144,
        stake_diff_windows: 20,
        max_fresh_stake_per_block: 20,
        stake_enabled_height: 256 + 256,
        stake_validation_height: 4_096,
        stake_diff_v2_height: Some(149_328),
        stake_version_interval: 144 * 2 * 7,
        stake_majority_multiplier: 3,
        stake_majority_divisor: 4,
        block_reject_num_required: 950,
        block_upgrade_num_to_check: 1_000,
    }
}

fn testnet_params() -> ChainParams {
    ChainParams {
        genesis_time: 1_533_513_600,
        pow_limit: hash256_from_hex(
            "000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("testnet pow limit"),
        pow_limit_bits: 0x1e00_ffff,
        reduce_min_difficulty: true,
        min_diff_reduction_time: 600,
        reduce_min_difficulty_end_height: Some(96_048),
        work_diff_alpha: 1,
        work_diff_window_size: 144,
        work_diff_windows: 20,
        target_timespan: 120 * 144,
        retarget_adjustment_factor: 4,
        algorithm_change: Some(AlgorithmChange {
            height: 28_800,
            start_bits: 0x1e00_ffff,
        }),
        test_net_difficulty_cap: Some(DifficultyCap {
            height: 43_200,
            bits: 0x1c7f_ffff,
        }),
        base_subsidy: 2_500_000_000,
        mul_subsidy: 100,
        div_subsidy: 101,
        subsidy_reduction_interval: 2_048,
        block_one_payout: 100_000 * COIN,
        minimum_stake_diff: 20_000_000,
        ticket_pool_size: 1_024,
        tickets_per_block: 5,
        ticket_maturity: 16,
        coinbase_maturity: 16,
        ticket_pool_size_weight: 4,
        stake_diff_alpha: 1,
        stake_diff_window_size: 144,
        stake_diff_windows: 20,
        max_fresh_stake_per_block: 20,
        stake_enabled_height: 16 + 16,
        stake_validation_height: 768,
        stake_diff_v2_height: None,
        stake_version_interval: 144 * 2 * 7,
        stake_majority_multiplier: 3,
        stake_majority_divisor: 4,
        block_reject_num_required: 75,
        block_upgrade_num_to_check: 100,
    }
}

fn simnet_params() -> ChainParams {
    ChainParams {
        genesis_time: 1_401_292_357,
        pow_limit: hash256_from_hex(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("simnet pow limit"),
        pow_limit_bits: 0x207f_ffff,
        reduce_min_difficulty: false,
        min_diff_reduction_time: 0,
        reduce_min_difficulty_end_height: None,
        work_diff_alpha: 1,
        work_diff_window_size: 8,
        work_diff_windows: 4,
        target_timespan: 8,
        retarget_adjustment_factor: 4,
        algorithm_change: None,
        test_net_difficulty_cap: None,
        base_subsidy: 50_000_000_000,
        mul_subsidy: 100,
        div_subsidy: 101,
        subsidy_reduction_interval: 128,
        block_one_payout: 300_000 * COIN,
        minimum_stake_diff: 20_000,
        ticket_pool_size: 64,
        tickets_per_block: 5,
        ticket_maturity: 16,
        coinbase_maturity: 16,
        ticket_pool_size_weight: 4,
        stake_diff_alpha: 1,
        stake_diff_window_size: 8,
        stake_diff_windows: 8,
        max_fresh_stake_per_block: 20,
        stake_enabled_height: 16 + 16,
        stake_validation_height: 16 + 64 * 2,
        stake_diff_v2_height: None,
        stake_version_interval: 8 * 2 * 7,
        stake_majority_multiplier: 3,
        stake_majority_divisor: 4,
        block_reject_num_required: 75,
        block_upgrade_num_to_check: 100,
    }
}

fn regnet_params() -> ChainParams {
    ChainParams {
        stake_validation_height: 144,
        stake_version_interval: 6 * 24,
        ..simnet_params()
    }
}
