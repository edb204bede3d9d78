//! In-memory serializable store.
//!
//! Optimistic concurrency over a shared ordered map: each transaction reads
//! from an immutable snapshot taken at begin, buffers its writes, and
//! validates its read set at commit against everything committed since the
//! snapshot (first-committer-wins). A transaction whose reads were
//! invalidated fails with a transient `CommitConflict` and is retried by
//! [`crate::run`].
//!
//! Conflict detection is key-granular, with range reads validated against
//! per-key write versions so phantom inserts into a read range are caught.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use keymint_error::{KeymintError, Result};
use parking_lot::Mutex;
use tracing::trace;

use crate::txn::{Transaction, TransactionOptions, TransactionalStore};

type Snapshot = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

struct StoreInner {
    data: Snapshot,
    /// Commit sequence that last wrote each key (including deletes).
    versions: BTreeMap<Vec<u8>, u64>,
    commit_seq: u64,
}

/// Shared in-memory store; cheap to clone, all clones see one key space.
///
/// Tests model separate processes as separate resolver contexts over one
/// `MemoryStore`.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                data: Arc::new(BTreeMap::new()),
                versions: BTreeMap::new(),
                commit_seq: 0,
            })),
        }
    }

    /// Number of keys currently committed (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Whether the store holds no committed keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self, opts: TransactionOptions) -> Result<Box<dyn Transaction>> {
        opts.check()?;
        let inner = self.inner.lock();
        Ok(Box::new(MemTransaction {
            store: Arc::clone(&self.inner),
            snapshot: Arc::clone(&inner.data),
            snapshot_seq: inner.commit_seq,
            writes: BTreeMap::new(),
            cleared: Vec::new(),
            read_keys: HashSet::new(),
            read_ranges: Vec::new(),
            opts,
        }))
    }
}

struct MemTransaction {
    store: Arc<Mutex<StoreInner>>,
    snapshot: Snapshot,
    snapshot_seq: u64,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Ranges cleared by this transaction, in application order before
    /// any later point writes.
    cleared: Vec<(Vec<u8>, Vec<u8>)>,
    read_keys: HashSet<Vec<u8>>,
    read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    opts: TransactionOptions,
}

fn in_range(key: &[u8], lo: &[u8], hi: &[u8]) -> bool {
    key >= lo && key < hi
}

impl Transaction for MemTransaction {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.opts.check()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        if self.cleared.iter().any(|(lo, hi)| in_range(key, lo, hi)) {
            return Ok(None);
        }
        self.read_keys.insert(key.to_vec());
        Ok(self.snapshot.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn clear(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn clear_range(&mut self, lo: &[u8], hi: &[u8]) {
        self.writes.retain(|key, _| !in_range(key, lo, hi));
        self.cleared.push((lo.to_vec(), hi.to_vec()));
    }

    fn get_range(&mut self, lo: &[u8], hi: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.opts.check()?;
        self.read_ranges.push((lo.to_vec(), hi.to_vec()));

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .range(lo.to_vec()..hi.to_vec())
            .filter(|(key, _)| {
                !self
                    .cleared
                    .iter()
                    .any(|(clo, chi)| in_range(key, clo, chi))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, write) in self.writes.range(lo.to_vec()..hi.to_vec()) {
            match write {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().take(limit).collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemTransaction {
            store,
            snapshot: _,
            snapshot_seq,
            writes,
            cleared,
            read_keys,
            read_ranges,
            opts,
        } = *self;
        opts.check()?;
        let mut inner = store.lock();

        // Read-only transactions observed a consistent snapshot; nothing to
        // validate or publish.
        if writes.is_empty() && cleared.is_empty() {
            return Ok(());
        }

        let invalidated_key = read_keys.iter().any(|key| {
            inner
                .versions
                .get(key)
                .is_some_and(|&seq| seq > snapshot_seq)
        });
        if invalidated_key {
            trace!(snapshot_seq, "read key invalidated");
            return Err(KeymintError::CommitConflict);
        }
        for (lo, hi) in &read_ranges {
            let invalidated = inner
                .versions
                .range(lo.clone()..hi.clone())
                .any(|(_, &seq)| seq > snapshot_seq);
            if invalidated {
                trace!(snapshot_seq, "read range invalidated");
                return Err(KeymintError::CommitConflict);
            }
        }

        let seq = inner.commit_seq + 1;
        let mut data = (*inner.data).clone();
        for (lo, hi) in &cleared {
            let doomed: Vec<Vec<u8>> = data
                .range(lo.clone()..hi.clone())
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                data.remove(&key);
                inner.versions.insert(key, seq);
            }
        }
        for (key, write) in writes {
            match write {
                Some(value) => {
                    data.insert(key.clone(), value);
                }
                None => {
                    data.remove(&key);
                }
            }
            inner.versions.insert(key, seq);
        }
        inner.data = Arc::new(data);
        inner.commit_seq = seq;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use keymint_error::ErrorKind;

    use super::*;
    use crate::txn::run;

    fn begin(store: &MemoryStore) -> Box<dyn Transaction> {
        store.begin(TransactionOptions::default()).unwrap()
    }

    #[test]
    fn reads_observe_own_writes() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        assert_eq!(txn.get(b"k").unwrap(), None);
        txn.set(b"k", b"v");
        assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));
        txn.clear(b"k");
        assert_eq!(txn.get(b"k").unwrap(), None);
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        txn.set(b"k", b"v");
        txn.commit().unwrap();

        let mut txn = begin(&store);
        assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn snapshot_isolation_hides_concurrent_commits() {
        let store = MemoryStore::new();
        let mut reader = begin(&store);

        let mut writer = begin(&store);
        writer.set(b"k", b"v");
        writer.commit().unwrap();

        assert_eq!(reader.get(b"k").unwrap(), None, "snapshot predates the write");
        reader.commit().unwrap();
    }

    #[test]
    fn first_committer_wins_on_read_write_race() {
        let store = MemoryStore::new();

        let mut a = begin(&store);
        let mut b = begin(&store);
        assert_eq!(a.get(b"counter").unwrap(), None);
        assert_eq!(b.get(b"counter").unwrap(), None);
        a.set(b"counter", b"1");
        b.set(b"counter", b"1");

        a.commit().unwrap();
        let err = b.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitConflict);
        assert!(err.is_transient());
    }

    #[test]
    fn phantom_insert_into_read_range_conflicts() {
        let store = MemoryStore::new();

        let mut scanner = begin(&store);
        assert!(scanner.get_range(b"a", b"z", 100).unwrap().is_empty());

        let mut inserter = begin(&store);
        inserter.set(b"m", b"phantom");
        inserter.commit().unwrap();

        scanner.set(b"result", b"empty");
        let err = scanner.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitConflict);
    }

    #[test]
    fn blind_writes_do_not_conflict() {
        let store = MemoryStore::new();
        let mut a = begin(&store);
        let mut b = begin(&store);
        a.set(b"x", b"a");
        b.set(b"y", b"b");
        a.commit().unwrap();
        b.commit().unwrap();
    }

    #[test]
    fn clear_range_deletes_committed_keys() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        txn.set(b"a1", b"1");
        txn.set(b"a2", b"2");
        txn.set(b"b1", b"3");
        txn.commit().unwrap();

        let mut txn = begin(&store);
        txn.clear_range(b"a", b"b");
        txn.commit().unwrap();

        let mut txn = begin(&store);
        assert_eq!(txn.get(b"a1").unwrap(), None);
        assert_eq!(txn.get(b"a2").unwrap(), None);
        assert_eq!(txn.get(b"b1").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn set_after_clear_range_wins() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        txn.set(b"a1", b"old");
        txn.commit().unwrap();

        let mut txn = begin(&store);
        txn.clear_range(b"a", b"b");
        txn.set(b"a1", b"new");
        assert_eq!(txn.get(b"a1").unwrap(), Some(b"new".to_vec()));
        txn.commit().unwrap();

        let mut txn = begin(&store);
        assert_eq!(txn.get(b"a1").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn get_range_merges_buffered_writes() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        txn.set(b"a", b"1");
        txn.set(b"c", b"3");
        txn.commit().unwrap();

        let mut txn = begin(&store);
        txn.set(b"b", b"2");
        txn.clear(b"c");
        let got = txn.get_range(b"a", b"z", 100).unwrap();
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn cancellation_aborts_before_commit() {
        let store = MemoryStore::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut txn = store
            .begin(TransactionOptions::with_cancel(Arc::clone(&cancel)))
            .unwrap();
        txn.set(b"k", b"v");
        cancel.store(true, Ordering::Relaxed);
        let err = txn.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let mut check = begin(&store);
        assert_eq!(check.get(b"k").unwrap(), None, "nothing was committed");
    }

    #[test]
    fn expired_deadline_surfaces_timeout() {
        let store = MemoryStore::new();
        let opts = TransactionOptions::with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        let err = match store.begin(opts) {
            Err(err) => err,
            Ok(mut txn) => txn.get(b"k").unwrap_err(),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn run_retries_transient_conflicts() {
        let store = MemoryStore::new();
        let mut txn = begin(&store);
        txn.set(b"k", b"0");
        txn.commit().unwrap();

        let mut attempts = 0;
        let value = run(&store, &TransactionOptions::default(), |txn| {
            attempts += 1;
            let read = txn.get(b"k")?.unwrap_or_default();
            if attempts == 1 {
                // Invalidate our own read from a side transaction.
                let mut side = begin(&store);
                side.set(b"k", b"interfering");
                side.commit().unwrap();
            }
            txn.set(b"k", b"done");
            Ok(read)
        })
        .unwrap();

        assert_eq!(attempts, 2, "first attempt conflicts, second succeeds");
        assert_eq!(value, b"interfering".to_vec());
    }

    #[test]
    fn run_surfaces_non_transient_errors() {
        let store = MemoryStore::new();
        let err = run::<(), _>(&store, &TransactionOptions::default(), |_| {
            Err(KeymintError::NotWritable)
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
    }
}
