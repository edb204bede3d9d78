//! High-contention value allocator.
//!
//! New values are assigned from a striped window above a shared counter so
//! concurrent allocators across processes rarely collide. Each attempt runs
//! inside the caller's creating transaction:
//!
//! 1. Read the counter (the allocation floor; `set_window` raises it).
//! 2. Pick a pseudo-random shard of [`SHARD_SIZE`] slots in the window
//!    above the floor and probe pseudo-random slots inside it.
//! 3. A slot is free when neither its claim key nor its reverse entry
//!    exists; claim it by setting the claim key in the same transaction.
//!
//! The claim is read before it is written, so two transactions claiming
//! the same slot are a serialization conflict at commit: exactly one wins
//! and the loser retries with fresh randomness. A shard whose probes all
//! hit claimed slots advances the counter past it, which keeps allocation
//! live when a region of the id space fills up.

use keymint_error::{KeymintError, Result};
use keymint_store::{ResolverMetrics, Transaction};
use keymint_types::{pack_u64, unpack, Element, ResolverSubspace};
use rand::Rng;
use tracing::{debug, warn};

/// Slots per allocation shard.
pub const SHARD_SIZE: u64 = 64;

/// Shards to choose from above the floor.
const SHARD_SPREAD: u64 = 64;

/// Probes inside a shard before it is declared crowded.
const PROBES_PER_SHARD: usize = 16;

/// Crowded-shard rounds before the attempt is abandoned as a transient
/// failure (the outer retry loop then re-runs the whole transaction).
const MAX_SHARD_ROUNDS: usize = 64;

/// Read the allocation floor within `txn`.
///
/// The effective floor is the counter raised to the scope's `window_high`.
pub(crate) fn read_floor(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    window_high: u64,
) -> Result<u64> {
    let counter = match txn.get(&subspace.counter_key())? {
        Some(bytes) => decode_counter(&bytes)?,
        None => 0,
    };
    Ok(counter.max(window_high))
}

/// Raise the allocation floor to at least `floor` within `txn`.
pub(crate) fn raise_floor(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    floor: u64,
) -> Result<u64> {
    let current = read_floor(txn, subspace, 0)?;
    let raised = current.max(floor);
    if raised > current {
        txn.set(&subspace.counter_key(), &pack_u64(raised));
    }
    Ok(raised)
}

fn decode_counter(bytes: &[u8]) -> Result<u64> {
    let elements = unpack(bytes)
        .map_err(|err| KeymintError::corrupt(format!("allocation counter: {err}")))?;
    match elements.as_slice() {
        [Element::U64(counter)] => Ok(*counter),
        _ => Err(KeymintError::corrupt(
            "allocation counter is not a single integer",
        )),
    }
}

/// Assign a fresh value within `txn`.
///
/// The claim key is written but the forward/reverse entries are the
/// caller's responsibility; everything commits atomically together.
pub(crate) fn allocate(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    window_high: u64,
    metrics: &ResolverMetrics,
) -> Result<u64> {
    let mut rng = rand::thread_rng();
    let mut floor = read_floor(txn, subspace, window_high)?;

    for round in 0..MAX_SHARD_ROUNDS {
        let shard = rng.gen_range(0..SHARD_SPREAD);
        let base = floor.saturating_add(shard * SHARD_SIZE);

        for _ in 0..PROBES_PER_SHARD {
            let candidate = base + rng.gen_range(0..SHARD_SIZE);
            if txn.get(&subspace.claim_key(candidate))?.is_some() {
                continue;
            }
            // A caller-chosen mapping may occupy a slot without a claim.
            metrics.record_directory_read();
            if txn.get(&subspace.reverse_key(candidate))?.is_some() {
                continue;
            }
            txn.set(&subspace.claim_key(candidate), &[]);
            debug!(candidate, floor, round, "allocated value");
            return Ok(candidate);
        }

        // Crowded shard: move the floor past it so later attempts (ours and
        // other processes') skip the dense region.
        floor = base.saturating_add(SHARD_SIZE);
        txn.set(&subspace.counter_key(), &pack_u64(floor));
        debug!(floor, round, "shard crowded, advancing allocation floor");
    }

    warn!(floor, "no free slot after {MAX_SHARD_ROUNDS} shard rounds");
    Err(KeymintError::CommitConflict)
}
