//! Bounded in-memory caches for resolved mappings.
//!
//! Two caches back the resolver: forward `(scope, key) → result` and
//! reverse `(scope, value) → key`. Entries are inserted only after the
//! transaction that observed them committed, so everything in cache
//! corresponds to a persistent mapping. A state-version change evicts every
//! entry of the affected scope.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use keymint_types::{ScopeId, ScopedValue};
use parking_lot::Mutex;

/// Default capacity of each cache.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Least-recently-used map with a fixed capacity.
///
/// Recency is a monotone tick stamped on access; eviction scans for the
/// minimum. Linear eviction is fine at the default capacity, and the
/// common operations stay allocation-free.
struct LruMap<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruMap<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(value, used)| {
            *used = tick;
            value.clone()
        })
    }

    fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, self.tick));
    }

    fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A thread-safe bounded cache keyed by [`ScopedValue`], with hit/miss
/// counters the coherence tests assert on.
pub struct ScopedCache<K, V> {
    inner: Mutex<LruMap<ScopedValue<K>, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> ScopedCache<K, V> {
    /// Create a cache bounded to `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruMap::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key` within `scope`.
    pub fn get(&self, scope: &ScopeId, key: K) -> Option<V> {
        let found = self.inner.lock().get(&scope.wrap(key));
        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a committed mapping for `key` within `scope`.
    pub fn insert(&self, scope: &ScopeId, key: K, value: V) {
        self.inner.lock().insert(scope.wrap(key), value);
    }

    /// Evict every entry belonging to `scope`.
    pub fn invalidate_scope(&self, scope: &ScopeId) {
        self.inner.lock().retain(|entry| entry.scope() != scope);
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookups served from cache.
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that fell through to the store.
    #[must_use]
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
