//! Test network relaxation.
//!
//! Between retarget boundaries, a header timestamped no earlier than its
//! parent and at most twenty spacings after it must carry the last "real"
//! target: the one found by walking back over blocks at the network limit,
//! stopping at genesis or a boundary. Headers outside that window keep
//! their parent's bits exactly, as on mainnet.

use crate::core::params::ChainParameters;
use crate::core::types::*;
use crate::pow::retarget::{check_unchanged, is_transition_point};
use crate::pow::{step_back, target_from_bits, ConsensusError};
use crate::storage::BlockStore;

/// Gap, in target spacings, after which a minimum-difficulty block is allowed.
pub const MIN_DIFFICULTY_GAP_SPACINGS: u32 = 20;

/// True when `next_timestamp` is no earlier than `prev_timestamp` and at most
/// twenty spacings later.
pub fn within_min_difficulty_window(prev_timestamp: u32, next_timestamp: u32, params: &ChainParameters) -> bool {
    let delta = i64::from(next_timestamp) - i64::from(prev_timestamp);
    let window = i64::from(MIN_DIFFICULTY_GAP_SPACINGS) * i64::from(params.target_spacing);
    (0..=window).contains(&delta)
}

/// Walk back from `stored_prev` over minimum-difficulty blocks. Stops at
/// genesis, at a retarget boundary, or at the first block whose target is
/// not the network limit.
pub fn last_non_min_difficulty_block<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    store: &S,
    params: &ChainParameters,
) -> Result<StoredBlock, ConsensusError> {
    let max_target = params.max_target();
    let interval = u64::from(params.interval);
    let mut cursor = stored_prev.clone();

    while !cursor.is_genesis()
        && cursor.height % interval != 0
        && target_from_bits(cursor.header.bits)? == max_target
    {
        cursor = step_back(store, &cursor)?;
    }
    Ok(cursor)
}

/// Check `next` against the min-difficulty rule. Only meaningful between
/// retarget boundaries on a network that allows minimum-difficulty blocks.
pub fn check_min_difficulty<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    next: &BlockHeader,
    store: &S,
    params: &ChainParameters,
) -> Result<(), ConsensusError> {
    if !within_min_difficulty_window(stored_prev.header.timestamp, next.timestamp, params) {
        return check_unchanged(stored_prev, next);
    }

    let cursor = last_non_min_difficulty_block(stored_prev, store, params)?;
    if target_from_bits(cursor.header.bits)? != target_from_bits(next.bits)? {
        tracing::debug!(
            "Min-difficulty walk from height {} stopped at {} with bits {:08x}",
            stored_prev.height,
            cursor.height,
            cursor.header.bits
        );
        return Err(ConsensusError::DifficultyMismatch {
            expected: cursor.header.bits,
            got: next.bits,
        });
    }
    Ok(())
}

/// Bits the min-difficulty rule dictates for a header at `next_timestamp`,
/// or `None` when the rule does not apply and the previous bits carry over.
pub fn min_difficulty_bits<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    next_timestamp: u32,
    store: &S,
    params: &ChainParameters,
) -> Result<Option<u32>, ConsensusError> {
    if !params.allow_min_difficulty_blocks
        || is_transition_point(stored_prev.height, params)
        || !within_min_difficulty_window(stored_prev.header.timestamp, next_timestamp, params)
    {
        return Ok(None);
    }
    let cursor = last_non_min_difficulty_block(stored_prev, store, params)?;
    Ok(Some(cursor.header.bits))
}
