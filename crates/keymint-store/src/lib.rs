//! Transactional store abstraction for the keymint resolver.
//!
//! The resolver never talks to a concrete store; it depends on the
//! [`TransactionalStore`] / [`Transaction`] traits and the serializability
//! contract they document. [`MemoryStore`] is the in-process implementation
//! used by the test suites, with optimistic first-committer-wins conflict
//! detection so contention behaves the way a distributed store's would.

pub mod memory;
pub mod metrics;
pub mod txn;

pub use memory::MemoryStore;
pub use metrics::{MetricsSnapshot, ResolverMetrics};
pub use txn::{
    run, Transaction, TransactionOptions, TransactionalStore, MAX_COMMIT_ATTEMPTS,
};
