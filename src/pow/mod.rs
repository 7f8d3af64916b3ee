//! Proof-of-work difficulty rules.
//!
//! The entry point is [`check_difficulty_transitions`]: the node calls it once
//! per incoming header with the previous stored block, the candidate header
//! and a block store. Between retarget boundaries the target must stay
//! unchanged (or follow the min-difficulty rule on test networks, see
//! [`testnet`]); on a boundary it is recomputed from the time the last
//! interval took (see [`retarget`]).

use std::fmt;

use crate::core::params::ChainParameters;
use crate::core::types::*;
use crate::storage::{BlockStore, LookupError, StorageError};

pub mod compact;
pub mod retarget;
pub mod testnet;

pub use compact::{CompactError, Target};
pub use retarget::{check_difficulty_transitions, is_transition_point, required_bits};

/// Decode compact bits, reporting failures as a consensus rejection.
pub fn target_from_bits(bits: u32) -> Result<Target, ConsensusError> {
    compact::decode(bits).map_err(|reason| ConsensusError::BadCompactTarget { bits, reason })
}

/// Interpret a hash as a little-endian 256-bit number
pub fn hash_to_target(hash: &Hash256) -> Target {
    Target::from_bytes_le(hash)
}

/// Returns true if the header's target is within the network limit and its
/// difficulty hash does not exceed that target.
pub fn is_valid_proof_of_work(header: &BlockHeader, params: &ChainParameters) -> bool {
    let target = match compact::decode(header.bits) {
        Ok(target) => target,
        Err(_) => return false,
    };
    if target > params.max_target() {
        return false;
    }
    hash_to_target(&params.difficulty_hash_of(header)) <= target
}

/// One step back along the chain, mapping lookup failures to rejections.
pub(crate) fn step_back<S: BlockStore + ?Sized>(
    store: &S,
    cursor: &StoredBlock,
) -> Result<StoredBlock, ConsensusError> {
    store.predecessor(cursor).map_err(|e| match e {
        LookupError::NotFound(missing) => ConsensusError::ChainIncomplete {
            height: cursor.height,
            missing,
        },
        LookupError::Storage(e) => ConsensusError::Storage(e),
    })
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Rejection of a candidate header. None of these are retried.
#[derive(Debug)]
pub enum ConsensusError {
    /// A header between retarget boundaries changed the target.
    UnexpectedDifficultyChange { height: u64, expected: u32, got: u32 },
    /// Recomputed target disagrees with the submitted one.
    DifficultyMismatch { expected: u32, got: u32 },
    /// The walk back from `height` hit a block the store does not have.
    ChainIncomplete { height: u64, missing: Hash256 },
    BadCompactTarget { bits: u32, reason: CompactError },
    Storage(StorageError),
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::UnexpectedDifficultyChange { height, expected, got } => write!(
                f,
                "unexpected change in difficulty at height {}: {:08x} vs {:08x}",
                height, got, expected
            ),
            ConsensusError::DifficultyMismatch { expected, got } => write!(
                f,
                "difficulty bits do not match what was calculated: {:08x} vs {:08x}",
                expected, got
            ),
            ConsensusError::ChainIncomplete { height, missing } => write!(
                f,
                "no way back to the last transition point from height {}; not found: {}",
                height,
                hash_to_hex(missing)
            ),
            ConsensusError::BadCompactTarget { bits, reason } => {
                write!(f, "bad compact target {:08x}: {}", bits, reason)
            }
            ConsensusError::Storage(e) => write!(f, "block store: {}", e),
        }
    }
}
impl std::error::Error for ConsensusError {}

impl From<StorageError> for ConsensusError {
    fn from(e: StorageError) -> Self {
        ConsensusError::Storage(e)
    }
}
