//! Operation counters for the resolver.
//!
//! Always-on relaxed atomics shared through the resolver context. Tests
//! assert on counter deltas the same way the operation contracts are
//! phrased: "a cache hit performs zero store reads".

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for resolver store traffic.
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    directory_read: AtomicU64,
    resolver_state_read: AtomicU64,
    commit: AtomicU64,
    wait_directory_resolve: AtomicU64,
}

/// Point-in-time snapshot of [`ResolverMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub directory_read: u64,
    pub resolver_state_read: u64,
    pub commit: u64,
    pub wait_directory_resolve: u64,
}

impl ResolverMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read of a forward or reverse directory entry.
    pub fn record_directory_read(&self) {
        self.directory_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read of the resolver state record.
    pub fn record_state_read(&self) {
        self.resolver_state_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed mutating transaction.
    pub fn record_commit(&self) {
        self.commit.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one resolve call waiting on the directory.
    pub fn record_wait_directory_resolve(&self) {
        self.wait_directory_resolve.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            directory_read: self.directory_read.load(Ordering::Relaxed),
            resolver_state_read: self.resolver_state_read.load(Ordering::Relaxed),
            commit: self.commit.load(Ordering::Relaxed),
            wait_directory_resolve: self.wait_directory_resolve.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters (tests/diagnostics).
    pub fn reset(&self) {
        self.directory_read.store(0, Ordering::Relaxed);
        self.resolver_state_read.store(0, Ordering::Relaxed);
        self.commit.store(0, Ordering::Relaxed);
        self.wait_directory_resolve.store(0, Ordering::Relaxed);
    }
}
