//! Shared resolver context.
//!
//! One context plays the role a database handle plays in the original
//! design: it owns the store handle, both mapping caches, the per-scope
//! state cache, and the operation counters. Every resolver handle built
//! over the same context shares all of them, and tests model separate
//! processes as separate contexts over one shared store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keymint_store::{ResolverMetrics, TransactionalStore};
use keymint_types::{ResolverResult, ResolverState, ScopeId};
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{ScopedCache, DEFAULT_CACHE_SIZE};

/// Default bound on resolver-state staleness.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(30);

/// Tunables for a [`ResolverContext`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a cached state record may be used before it is re-read.
    pub refresh_period: Duration,
    /// Capacity of the forward and reverse caches.
    pub cache_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh_period: DEFAULT_REFRESH_PERIOD,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl ResolverConfig {
    /// Config with a custom staleness bound (tests typically use 100 ms).
    #[must_use]
    pub fn with_refresh_period(refresh_period: Duration) -> Self {
        Self {
            refresh_period,
            ..Self::default()
        }
    }
}

struct CachedState {
    state: ResolverState,
    read_at: Instant,
}

/// Shared state for every resolver handle of one process.
pub struct ResolverContext {
    store: Arc<dyn TransactionalStore>,
    config: ResolverConfig,
    forward_cache: ScopedCache<String, ResolverResult>,
    reverse_cache: ScopedCache<u64, String>,
    state_cache: Mutex<HashMap<ScopeId, CachedState>>,
    metrics: ResolverMetrics,
}

impl ResolverContext {
    /// Build a context over a store with the given config.
    #[must_use]
    pub fn new(store: Arc<dyn TransactionalStore>, config: ResolverConfig) -> Arc<Self> {
        let cache_size = config.cache_size;
        Arc::new(Self {
            store,
            config,
            forward_cache: ScopedCache::new(cache_size),
            reverse_cache: ScopedCache::new(cache_size),
            state_cache: Mutex::new(HashMap::new()),
            metrics: ResolverMetrics::new(),
        })
    }

    /// Build a context with default config.
    #[must_use]
    pub fn with_defaults(store: Arc<dyn TransactionalStore>) -> Arc<Self> {
        Self::new(store, ResolverConfig::default())
    }

    /// The underlying store handle.
    #[must_use]
    pub fn store(&self) -> &dyn TransactionalStore {
        self.store.as_ref()
    }

    /// The configured tunables.
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The shared operation counters.
    #[must_use]
    pub const fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    /// The forward mapping cache.
    #[must_use]
    pub const fn forward_cache(&self) -> &ScopedCache<String, ResolverResult> {
        &self.forward_cache
    }

    /// The reverse mapping cache.
    #[must_use]
    pub const fn reverse_cache(&self) -> &ScopedCache<u64, String> {
        &self.reverse_cache
    }

    /// The cached state for `scope` if it is younger than the refresh
    /// period.
    pub(crate) fn fresh_state(&self, scope: &ScopeId) -> Option<ResolverState> {
        let cache = self.state_cache.lock();
        cache.get(scope).and_then(|cached| {
            (cached.read_at.elapsed() < self.config.refresh_period).then_some(cached.state)
        })
    }

    /// Record a state observation for `scope`.
    ///
    /// If the observed version advanced past the previously cached one,
    /// every forward and reverse entry of the scope is evicted. Stale
    /// observations (older version than already cached) only refresh the
    /// timestamp of the newer state.
    pub(crate) fn note_state(&self, scope: &ScopeId, state: ResolverState) {
        let mut cache = self.state_cache.lock();
        let previous = cache.get(scope).map(|cached| cached.state);
        let newest = match previous {
            Some(old) if old.version > state.version => old,
            _ => state,
        };
        cache.insert(
            scope.clone(),
            CachedState {
                state: newest,
                read_at: Instant::now(),
            },
        );
        drop(cache);

        if let Some(old) = previous {
            if newest.version > old.version {
                debug!(
                    scope = ?scope,
                    old_version = old.version,
                    new_version = newest.version,
                    "state version advanced, invalidating scope caches"
                );
                self.forward_cache.invalidate_scope(scope);
                self.reverse_cache.invalidate_scope(scope);
            }
        }
    }

    /// Drop all cached mappings and state, forcing the next operation of
    /// every scope back to the store.
    pub fn clear_caches(&self) {
        self.forward_cache.clear();
        self.reverse_cache.clear();
        self.state_cache.lock().clear();
    }
}
