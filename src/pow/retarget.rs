//! Interval retargeting.
//!
//! Every `interval` blocks the target is recomputed:
//!
//!   new = prev_target * clamp(actual_timespan) / target_timespan
//!
//! where `actual_timespan` is the time between the first and the last block of
//! the interval that just ended. The result is capped at the network limit,
//! cut down to the precision the submitted header's exponent can carry, and
//! must then equal the submitted compact bits exactly.

use num_bigint::BigUint;
use std::cmp;
use std::time::Instant;

use crate::core::params::ChainParameters;
use crate::core::types::*;
use crate::pow::compact::{self, Target};
use crate::pow::{step_back, target_from_bits, testnet, ConsensusError};
use crate::storage::{BlockStore, StorageError};

/// Walks slower than this are worth a log line
const SLOW_WALK_MILLIS: u128 = 50;

/// True when the block after `height` starts a new interval and must carry a
/// recomputed target.
pub fn is_transition_point(height: u64, params: &ChainParameters) -> bool {
    (height + 1) % u64::from(params.interval) == 0
}

/// Validate the target of `next`, the header proposed on top of `stored_prev`.
pub fn check_difficulty_transitions<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    next: &BlockHeader,
    store: &S,
    params: &ChainParameters,
) -> Result<(), ConsensusError> {
    if !is_transition_point(stored_prev.height, params) {
        if params.allow_min_difficulty_blocks {
            return testnet::check_min_difficulty(stored_prev, next, store, params);
        }
        return check_unchanged(stored_prev, next);
    }

    let interval_start = find_interval_start(stored_prev, store, params)?;
    let new_target = next_target(stored_prev, &interval_start, params)?;
    let expected = compact::encode(&reduce_precision(&new_target, next.bits));

    if expected != next.bits {
        return Err(ConsensusError::DifficultyMismatch { expected, got: next.bits });
    }
    Ok(())
}

/// Compact bits a well-formed header on top of `stored_prev` carries when
/// it is timestamped `next_timestamp`. A header with these bits always
/// passes [`check_difficulty_transitions`].
pub fn required_bits<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    next_timestamp: u32,
    store: &S,
    params: &ChainParameters,
) -> Result<u32, ConsensusError> {
    if !is_transition_point(stored_prev.height, params) {
        if params.allow_min_difficulty_blocks {
            if let Some(bits) = testnet::min_difficulty_bits(stored_prev, next_timestamp, store, params)? {
                return Ok(bits);
            }
        }
        return Ok(stored_prev.header.bits);
    }

    let interval_start = find_interval_start(stored_prev, store, params)?;
    let new_target = next_target(stored_prev, &interval_start, params)?;
    Ok(compact::encode(&new_target))
}

/// Non-boundary rule: the target carries over unchanged.
pub fn check_unchanged(stored_prev: &StoredBlock, next: &BlockHeader) -> Result<(), ConsensusError> {
    if next.bits != stored_prev.header.bits {
        return Err(ConsensusError::UnexpectedDifficultyChange {
            height: stored_prev.height,
            expected: stored_prev.header.bits,
            got: next.bits,
        });
    }
    Ok(())
}

/// First block of the interval that ends at `stored_prev`: `interval - 1`
/// steps back, so `interval` blocks are visited counting `stored_prev`.
/// `stored_prev` itself is not looked up; only its ancestors must be stored.
pub fn find_interval_start<S: BlockStore + ?Sized>(
    stored_prev: &StoredBlock,
    store: &S,
    params: &ChainParameters,
) -> Result<StoredBlock, ConsensusError> {
    let started = Instant::now();
    let mut cursor = stored_prev.clone();
    for _ in 1..params.interval {
        cursor = step_back(store, &cursor)?;
    }

    let interval = u64::from(params.interval);
    if cursor.height % interval != 0 || cursor.height + interval != stored_prev.height + 1 {
        return Err(ConsensusError::Storage(StorageError::Inconsistent(format!(
            "walk from height {} arrived at height {}, not a transition point",
            stored_prev.height, cursor.height
        ))));
    }

    let elapsed = started.elapsed();
    if elapsed.as_millis() > SLOW_WALK_MILLIS {
        tracing::info!("Difficulty transition traversal took {:?}", elapsed);
    }
    Ok(cursor)
}

/// Clamp a measured timespan to the window in force after `prev_height`.
/// Negative spans (timestamps running backwards) clamp to the lower bound.
pub fn clamp_timespan(timespan: i64, prev_height: u64, params: &ChainParameters) -> u32 {
    let (lower, upper) = params
        .timespan_bounds
        .for_height(prev_height, params.target_timespan);
    cmp::min(cmp::max(timespan, i64::from(lower)), i64::from(upper)) as u32
}

/// `prev_bits` scaled by `timespan / target_timespan`, capped at the limit.
/// `timespan` must already be clamped.
pub fn retarget(prev_bits: u32, timespan: u32, params: &ChainParameters) -> Result<Target, ConsensusError> {
    let prev_target = target_from_bits(prev_bits)?;
    let mut new_target = prev_target * BigUint::from(timespan) / BigUint::from(params.target_timespan);

    let max_target = params.max_target();
    if new_target > max_target {
        tracing::info!("Difficulty hit proof of work limit: {:x}", new_target);
        new_target = max_target;
    }
    Ok(new_target)
}

/// Keep only the three bytes of `target` that the exponent of
/// `submitted_bits` can address. The exponent comes from the submitted header,
/// not from the computed target.
pub fn reduce_precision(target: &Target, submitted_bits: u32) -> Target {
    let accuracy_bytes = (submitted_bits >> 24) as i64 - 3;
    let mantissa = BigUint::from(0x00ff_ffffu32);
    let mask = if accuracy_bytes >= 0 {
        mantissa << (accuracy_bytes as usize * 8)
    } else {
        mantissa >> ((-accuracy_bytes) as usize * 8)
    };
    target & mask
}

fn next_target(
    stored_prev: &StoredBlock,
    interval_start: &StoredBlock,
    params: &ChainParameters,
) -> Result<Target, ConsensusError> {
    let actual = i64::from(stored_prev.header.timestamp) - i64::from(interval_start.header.timestamp);
    let timespan = clamp_timespan(actual, stored_prev.height, params);
    let new_target = retarget(stored_prev.header.bits, timespan, params)?;

    tracing::debug!(
        "Retarget after height {}: actual {}s, clamped {}s, bits {:08x} -> {:08x}",
        stored_prev.height,
        actual,
        timespan,
        stored_prev.header.bits,
        compact::encode(&new_target),
    );
    Ok(new_target)
}
