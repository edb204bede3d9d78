//! Transactional access to the forward and reverse mapping entries.
//!
//! Both halves of a mapping are written by the same transaction; observing
//! one half without the other is a consistency violation surfaced as
//! corruption, never silently healed.

use keymint_error::{KeymintError, Result};
use keymint_store::{ResolverMetrics, Transaction};
use keymint_types::{pack_str, unpack, Element, ResolverResult, ResolverSubspace};

/// Read the forward entry for `key` within `txn`.
pub(crate) fn read_forward(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    key: &str,
    metrics: &ResolverMetrics,
) -> Result<Option<ResolverResult>> {
    metrics.record_directory_read();
    let raw = txn.get(&subspace.mapping_key(key))?;
    raw.map(|bytes| {
        ResolverResult::decode(&bytes)
            .map_err(|err| KeymintError::corrupt(format!("forward entry for '{key}': {err}")))
    })
    .transpose()
}

/// Read the reverse entry for `value` within `txn`.
pub(crate) fn read_reverse(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    value: u64,
    metrics: &ResolverMetrics,
) -> Result<Option<String>> {
    metrics.record_directory_read();
    let raw = txn.get(&subspace.reverse_key(value))?;
    raw.map(|bytes| decode_reverse(&bytes, value)).transpose()
}

fn decode_reverse(bytes: &[u8], value: u64) -> Result<String> {
    let elements = unpack(bytes)
        .map_err(|err| KeymintError::corrupt(format!("reverse entry for {value}: {err}")))?;
    match elements.as_slice() {
        [Element::Str(key)] => Ok(key.clone()),
        _ => Err(KeymintError::corrupt(format!(
            "reverse entry for {value} is not a single string"
        ))),
    }
}

/// Write both halves of a mapping within `txn`.
pub(crate) fn write_pair(
    txn: &mut dyn Transaction,
    subspace: &ResolverSubspace,
    key: &str,
    result: &ResolverResult,
) {
    txn.set(&subspace.mapping_key(key), &result.encode());
    txn.set(&subspace.reverse_key(result.value()), &pack_str(key));
}
