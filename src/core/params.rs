//! AltPoW Chain Parameters
//! All consensus-critical constants are defined here, one immutable
//! `ChainParameters` value per network.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::core::types::{BlockHeader, Hash256, NULL_HASH};
use crate::pow::compact::{self, Target};

/// Retarget window: 6 hours of chain time
pub const TARGET_TIMESPAN: u32 = 6 * 60 * 60;

/// Target block time in seconds (1 minute)
pub const TARGET_SPACING: u32 = 60;

/// Blocks between difficulty retargets (360)
pub const INTERVAL: u32 = TARGET_TIMESPAN / TARGET_SPACING;

/// Merge-mining chain identifier. Carried as a constant only.
pub const AUXPOW_CHAIN_ID: u32 = 0x1000;

/// Proof-of-work limit on mainnet and testnet
pub const MAX_TARGET_BITS: u32 = 0x1e0f_ffff;

/// Proof-of-work limit on regtest (about half of all hashes qualify)
pub const REGTEST_MAX_TARGET_BITS: u32 = 0x207f_ffff;

/// Height of the bridge hard fork on mainnet
pub const MAINNET_BRIDGE_HEIGHT: u64 = 348_000;

/// Height of the bridge hard fork on testnet
pub const TESTNET_BRIDGE_HEIGHT: u64 = 1_000;

/// Post-bridge clamp on the measured retarget timespan (seconds)
pub const BRIDGE_MIN_TIMESPAN: u32 = 17_280;
pub const BRIDGE_MAX_TIMESPAN: u32 = 27_000;

/// Genesis header fields shared by every network
pub const GENESIS_TIMESTAMP: u32 = 1_611_028_800;
pub const GENESIS_NONCE: u32 = 4_632_189;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Regtest];

    /// Stable identifier, also written into persistent storage.
    pub fn id(&self) -> &'static str {
        match self {
            Network::Mainnet => "org.vircle.production",
            Network::Testnet => "org.vircle.test",
            Network::Regtest => "org.vircle.regtest",
        }
    }

    pub fn from_id(id: &str) -> Option<Network> {
        Network::ALL.into_iter().find(|n| n.id() == id)
    }

    pub fn default_data_dir(&self) -> &'static str {
        match self {
            Network::Mainnet => "altpow_data",
            Network::Testnet => "altpow_testnet",
            Network::Regtest => "altpow_regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network '{}' (expected mainnet, testnet or regtest)", other)),
        }
    }
}

/// Clamp applied to the measured timespan at a retarget.
///
/// Before `bridge_activation_height` the clamp is relative to the target
/// timespan (`T / legacy_divisor ..= T * legacy_multiplier`); from that height
/// on it switches to the absolute `bridge_min ..= bridge_max` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimespanBounds {
    pub legacy_divisor: u32,
    pub legacy_multiplier: u32,
    pub bridge_activation_height: u64,
    pub bridge_min: u32,
    pub bridge_max: u32,
}

impl TimespanBounds {
    /// `(lower, upper)` clamp for a retarget whose last block is at `prev_height`.
    pub fn for_height(&self, prev_height: u64, target_timespan: u32) -> (u32, u32) {
        if prev_height >= self.bridge_activation_height {
            (self.bridge_min, self.bridge_max)
        } else {
            (
                target_timespan / self.legacy_divisor,
                target_timespan.saturating_mul(self.legacy_multiplier),
            )
        }
    }
}

/// Per-network consensus parameters consumed by the difficulty engine.
#[derive(Debug, Clone, Serialize)]
pub struct ChainParameters {
    pub network: Network,
    /// Blocks between retargets (I)
    pub interval: u32,
    /// Nominal duration of one interval in seconds (T)
    pub target_timespan: u32,
    /// Nominal seconds per block (S)
    pub target_spacing: u32,
    /// Compact form of the easiest allowed target (M)
    pub max_target_bits: u32,
    pub timespan_bounds: TimespanBounds,
    /// Testnet relaxation between retargets
    pub allow_min_difficulty_blocks: bool,
    pub auxpow_chain_id: u32,
    pub genesis_timestamp: u32,
    pub genesis_bits: u32,
    pub genesis_nonce: u32,
    /// Which hash of a header is compared against its target
    #[serde(skip)]
    pub difficulty_hash: fn(&BlockHeader) -> Hash256,
}

impl ChainParameters {
    /// Registry: an owned parameter table for `network`.
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn mainnet() -> Self {
        ChainParameters {
            network: Network::Mainnet,
            interval: INTERVAL,
            target_timespan: TARGET_TIMESPAN,
            target_spacing: TARGET_SPACING,
            max_target_bits: MAX_TARGET_BITS,
            timespan_bounds: TimespanBounds {
                legacy_divisor: 4,
                legacy_multiplier: 4,
                bridge_activation_height: MAINNET_BRIDGE_HEIGHT,
                bridge_min: BRIDGE_MIN_TIMESPAN,
                bridge_max: BRIDGE_MAX_TIMESPAN,
            },
            allow_min_difficulty_blocks: false,
            auxpow_chain_id: AUXPOW_CHAIN_ID,
            genesis_timestamp: GENESIS_TIMESTAMP,
            genesis_bits: MAX_TARGET_BITS,
            genesis_nonce: GENESIS_NONCE,
            difficulty_hash: BlockHeader::hash,
        }
    }

    pub fn testnet() -> Self {
        let mainnet = Self::mainnet();
        ChainParameters {
            network: Network::Testnet,
            timespan_bounds: TimespanBounds {
                bridge_activation_height: TESTNET_BRIDGE_HEIGHT,
                ..mainnet.timespan_bounds
            },
            allow_min_difficulty_blocks: true,
            ..mainnet
        }
    }

    pub fn regtest() -> Self {
        let testnet = Self::testnet();
        ChainParameters {
            network: Network::Regtest,
            max_target_bits: REGTEST_MAX_TARGET_BITS,
            genesis_bits: REGTEST_MAX_TARGET_BITS,
            genesis_nonce: 0,
            timespan_bounds: TimespanBounds {
                bridge_activation_height: 0,
                ..testnet.timespan_bounds
            },
            ..testnet
        }
    }

    /// Decoded proof-of-work limit (M).
    pub fn max_target(&self) -> Target {
        // check() rejects tables whose limit does not decode
        compact::decode(self.max_target_bits).unwrap_or_default()
    }

    /// Hash of `header` that must not exceed its target.
    pub fn difficulty_hash_of(&self, header: &BlockHeader) -> Hash256 {
        (self.difficulty_hash)(header)
    }

    /// Header the chain starts from. The merkle root is left null: genesis
    /// contents belong to the node, only the difficulty fields matter here.
    pub fn genesis_header(&self) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: NULL_HASH,
            merkle_root: NULL_HASH,
            timestamp: self.genesis_timestamp,
            bits: self.genesis_bits,
            nonce: self.genesis_nonce,
        }
    }

    /// Startup sanity check. A failure here is a configuration bug.
    pub fn check(&self) -> Result<(), ParamsError> {
        if self.interval == 0 {
            return Err(ParamsError::ZeroInterval);
        }
        if self.target_spacing == 0 {
            return Err(ParamsError::ZeroSpacing);
        }
        if u64::from(self.interval) * u64::from(self.target_spacing) != u64::from(self.target_timespan) {
            return Err(ParamsError::TimespanMismatch {
                interval: self.interval,
                spacing: self.target_spacing,
                timespan: self.target_timespan,
            });
        }
        let bounds = &self.timespan_bounds;
        if bounds.legacy_divisor == 0 || bounds.legacy_multiplier == 0 {
            return Err(ParamsError::InvalidBounds("legacy divisor and multiplier must be non-zero".into()));
        }
        if self.target_timespan / bounds.legacy_divisor == 0 {
            return Err(ParamsError::InvalidBounds("legacy lower bound rounds to zero".into()));
        }
        if bounds.bridge_min == 0 || bounds.bridge_min > bounds.bridge_max {
            return Err(ParamsError::InvalidBounds(format!(
                "bridge window {}..={} is empty or starts at zero",
                bounds.bridge_min, bounds.bridge_max
            )));
        }
        match compact::decode(self.max_target_bits) {
            Ok(max) if max > Target::default() => {}
            _ => return Err(ParamsError::InvalidMaxTarget(self.max_target_bits)),
        }
        if compact::decode(self.genesis_bits).map(|t| t > self.max_target()).unwrap_or(true) {
            return Err(ParamsError::InvalidGenesisBits(self.genesis_bits));
        }
        Ok(())
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    ZeroInterval,
    ZeroSpacing,
    TimespanMismatch { interval: u32, spacing: u32, timespan: u32 },
    InvalidBounds(String),
    InvalidMaxTarget(u32),
    InvalidGenesisBits(u32),
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsError::ZeroInterval => write!(f, "retarget interval must be positive"),
            ParamsError::ZeroSpacing => write!(f, "target spacing must be positive"),
            ParamsError::TimespanMismatch { interval, spacing, timespan } => write!(
                f,
                "target timespan {} != interval {} * spacing {}",
                timespan, interval, spacing
            ),
            ParamsError::InvalidBounds(msg) => write!(f, "invalid timespan bounds: {}", msg),
            ParamsError::InvalidMaxTarget(bits) => write!(f, "invalid max target bits {:#010x}", bits),
            ParamsError::InvalidGenesisBits(bits) => write!(f, "invalid genesis bits {:#010x}", bits),
        }
    }
}
impl std::error::Error for ParamsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_networks_pass_check() {
        for network in Network::ALL {
            let params = ChainParameters::for_network(network);
            assert_eq!(params.network, network);
            assert_eq!(params.check(), Ok(()), "{} params invalid", network);
        }
    }

    #[test]
    fn test_interval() {
        assert_eq!(INTERVAL, 360);
        assert_eq!(ChainParameters::mainnet().interval * TARGET_SPACING, TARGET_TIMESPAN);
    }

    #[test]
    fn test_network_flags() {
        assert!(!ChainParameters::mainnet().allow_min_difficulty_blocks);
        assert!(ChainParameters::testnet().allow_min_difficulty_blocks);
        assert!(ChainParameters::regtest().allow_min_difficulty_blocks);
        assert_eq!(ChainParameters::mainnet().timespan_bounds.bridge_activation_height, 348_000);
        assert_eq!(ChainParameters::testnet().timespan_bounds.bridge_activation_height, 1_000);
    }

    #[test]
    fn test_bounds_regimes() {
        let bounds = ChainParameters::mainnet().timespan_bounds;
        assert_eq!(bounds.for_height(0, TARGET_TIMESPAN), (5_400, 86_400));
        assert_eq!(bounds.for_height(347_999, TARGET_TIMESPAN), (5_400, 86_400));
        assert_eq!(bounds.for_height(348_000, TARGET_TIMESPAN), (17_280, 27_000));
    }

    #[test]
    fn test_check_rejects_bad_tables() {
        let mut params = ChainParameters::mainnet();
        params.interval = 0;
        assert_eq!(params.check(), Err(ParamsError::ZeroInterval));

        let mut params = ChainParameters::mainnet();
        params.target_timespan += 1;
        assert!(matches!(params.check(), Err(ParamsError::TimespanMismatch { .. })));

        let mut params = ChainParameters::mainnet();
        params.timespan_bounds.bridge_min = 30_000;
        assert!(matches!(params.check(), Err(ParamsError::InvalidBounds(_))));

        let mut params = ChainParameters::mainnet();
        params.max_target_bits = 0x04923456; // negative
        assert_eq!(params.check(), Err(ParamsError::InvalidMaxTarget(0x04923456)));

        let mut params = ChainParameters::mainnet();
        params.genesis_bits = 0x1f0fffff; // easier than the limit
        assert_eq!(params.check(), Err(ParamsError::InvalidGenesisBits(0x1f0fffff)));
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("TestNet".parse::<Network>(), Ok(Network::Testnet));
        assert!("signet".parse::<Network>().is_err());
        for network in Network::ALL {
            assert_eq!(Network::from_id(network.id()), Some(network));
            assert_eq!(network.to_string().parse::<Network>(), Ok(network));
        }
    }

    #[test]
    fn test_difficulty_hash_is_block_hash() {
        let params = ChainParameters::mainnet();
        let genesis = params.genesis_header();
        assert_eq!(params.difficulty_hash_of(&genesis), genesis.hash());
    }

    #[test]
    fn test_params_json_skips_hash_selector() {
        let json = serde_json::to_value(ChainParameters::testnet()).unwrap();
        assert_eq!(json["network"], "testnet");
        assert_eq!(json["interval"], 360);
        assert!(json.get("difficulty_hash").is_none());
    }
}
