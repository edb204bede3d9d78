//! Transactional store abstraction.
//!
//! This trait pair abstracts the ordered key-value store the resolver runs
//! against, allowing different backends: a distributed store in production
//! or the in-memory store for testing. The contract the resolver depends on
//! is serializability: two committed transactions behave as if they ran one
//! after the other, and a transaction that read data another committer
//! changed fails with a transient conflict.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keymint_error::{KeymintError, Result};
use rand::Rng;
use tracing::debug;

/// Retry budget for transient commit conflicts in [`run`].
pub const MAX_COMMIT_ATTEMPTS: u32 = 30;

/// Caller-supplied limits for one transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Abort with `Timeout` once this instant has passed.
    pub deadline: Option<Instant>,
    /// Abort with `Cancelled` once this flag is raised.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl TransactionOptions {
    /// Options with a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Options carrying a cancellation flag.
    #[must_use]
    pub fn with_cancel(cancel: Arc<AtomicBool>) -> Self {
        Self {
            deadline: None,
            cancel: Some(cancel),
        }
    }

    /// Check the cancellation flag and deadline.
    ///
    /// Called by store implementations at every read and at commit, so a
    /// cancelled or expired transaction aborts before it can commit.
    pub fn check(&self) -> Result<()> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(KeymintError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(KeymintError::Timeout);
            }
        }
        Ok(())
    }
}

/// One serializable transaction.
///
/// Reads observe the transaction's own writes. Dropping a transaction
/// without committing aborts it.
pub trait Transaction: Send {
    /// Read the value at `key`.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffer a write of `value` at `key`.
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Buffer a delete of `key`.
    fn clear(&mut self, key: &[u8]);

    /// Buffer a delete of every key in `[lo, hi)`.
    fn clear_range(&mut self, lo: &[u8], hi: &[u8]);

    /// Read up to `limit` key-value pairs in `[lo, hi)`, in key order.
    fn get_range(&mut self, lo: &[u8], hi: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically commit the buffered writes.
    ///
    /// Fails with a transient `CommitConflict` if another transaction
    /// committed a change to data this one read.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A handle to a store that can open serializable transactions.
pub trait TransactionalStore: Send + Sync {
    /// Open a new transaction.
    fn begin(&self, opts: TransactionOptions) -> Result<Box<dyn Transaction>>;
}

/// Run `body` in a transaction, retrying transient conflicts.
///
/// The body may be invoked multiple times; it must be idempotent up to its
/// buffered writes. Conflicts are retried with jittered backoff up to
/// [`MAX_COMMIT_ATTEMPTS`], after which the last conflict surfaces as
/// `RetryExhausted`. Non-transient errors from the body or the commit are
/// returned as-is.
pub fn run<T, F>(store: &dyn TransactionalStore, opts: &TransactionOptions, mut body: F) -> Result<T>
where
    F: FnMut(&mut dyn Transaction) -> Result<T>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let mut txn = store.begin(opts.clone())?;
        let outcome = body(txn.as_mut()).and_then(|value| txn.commit().map(|()| value));
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt >= MAX_COMMIT_ATTEMPTS {
                    return Err(KeymintError::retry_exhausted(attempt, err));
                }
                debug!(attempt, "commit conflict, retrying");
                backoff(attempt);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sleep for a jittered, capped-exponential interval before a retry.
fn backoff(attempt: u32) {
    let cap_us = 100u64 << attempt.min(7);
    let wait_us = rand::thread_rng().gen_range(0..=cap_us);
    std::thread::sleep(Duration::from_micros(wait_us));
}
