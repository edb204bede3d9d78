//! Scope identity and scope-qualified cache keys.

use std::fmt;
use std::sync::Arc;

/// Identity of a resolver scope: the resolved byte prefix of its path.
///
/// Two scopes with the same prefix are the same scope, regardless of which
/// handle produced them. Equality, hashing, and ordering use the prefix
/// bytes only, never object identity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(Arc<[u8]>);

impl ScopeId {
    /// Create a scope id from a resolved byte prefix.
    #[must_use]
    pub fn new(prefix: impl Into<Arc<[u8]>>) -> Self {
        Self(prefix.into())
    }

    /// The raw prefix bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Qualify a value with this scope for use as a cache key.
    #[must_use]
    pub fn wrap<T>(&self, data: T) -> ScopedValue<T> {
        ScopedValue {
            scope: self.clone(),
            data,
        }
    }
}

impl From<Vec<u8>> for ScopeId {
    fn from(prefix: Vec<u8>) -> Self {
        Self::new(prefix)
    }
}

impl From<&[u8]> for ScopeId {
    fn from(prefix: &[u8]) -> Self {
        Self::new(prefix.to_vec())
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId(0x")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// A value qualified by the scope it belongs to.
///
/// Cache keys for the forward and reverse caches; `(scope, data)` equality
/// means two resolver handles over the same path share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedValue<T> {
    scope: ScopeId,
    data: T,
}

impl<T> ScopedValue<T> {
    /// The scope this value belongs to.
    #[must_use]
    pub const fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// The unqualified value.
    #[must_use]
    pub const fn data(&self) -> &T {
        &self.data
    }

    /// Consume the wrapper, returning the unqualified value.
    pub fn into_data(self) -> T {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn equality_is_by_prefix_not_identity() {
        let a = ScopeId::new(vec![1, 2, 3]);
        let b = ScopeId::new(vec![1, 2, 3]);
        let c = ScopeId::new(vec![1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn scoped_values_key_caches_by_scope_and_data() {
        let scope1 = ScopeId::new(vec![1]);
        let scope1_again = ScopeId::new(vec![1]);
        let scope2 = ScopeId::new(vec![2]);

        let mut cache = HashMap::new();
        cache.insert(scope1.wrap("stuff".to_owned()), 1u64);

        assert_eq!(cache.get(&scope1.wrap("stuff".to_owned())), Some(&1));
        assert_eq!(cache.get(&scope1.wrap("missing".to_owned())), None);
        assert_eq!(cache.get(&scope2.wrap("stuff".to_owned())), None);
        assert_eq!(
            cache.get(&scope1_again.wrap("stuff".to_owned())),
            Some(&1),
            "a fresh handle over the same prefix shares entries"
        );
    }
}
