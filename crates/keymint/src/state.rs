//! Transactional access to the per-scope state record.

use keymint_error::{KeymintError, Result};
use keymint_store::{ResolverMetrics, Transaction};
use keymint_types::{ResolverState, ResolverSubspace};

/// Read the scope's state record within `txn`.
///
/// An absent record is the default state; an undecodable record is fatal.
pub(crate) fn read_state(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    metrics: &ResolverMetrics,
) -> Result<ResolverState> {
    metrics.record_state_read();
    let raw = txn.get(&subspace.state_key())?;
    ResolverState::decode_or_default(raw.as_deref())
        .map_err(|err| KeymintError::corrupt(format!("state record: {err}")))
}

/// Write the scope's state record within `txn`.
pub(crate) fn write_state(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    state: &ResolverState,
) {
    txn.set(&subspace.state_key(), &state.encode());
}
