//! Subspace addressing: the three disjoint key areas of a resolver scope.
//!
//! Given a scope prefix `P`, the persistent layout is:
//!
//! ```text
//! P || 0x00 || pack(key)        -> pack(value, metadata)   forward mapping
//! P || 0x01 || pack(value)      -> pack(key)               reverse mapping
//! P || 0x02                     -> pack(version, lock, window_high)
//! P || 0x02 || pack("alloc")    -> pack(counter)           allocation floor
//! P || 0x02 || pack("alloc", v) -> []                      claim for value v
//! ```

use crate::scope::ScopeId;
use crate::tuple::Element;

const MAPPING: u8 = 0x00;
const REVERSE: u8 = 0x01;
const STATE: u8 = 0x02;

const ALLOC: &str = "alloc";

/// The addressable key areas of one resolver scope.
///
/// Equality and hashing are inherited from [`ScopeId`]: two subspaces over
/// the same resolved prefix are the same subspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolverSubspace {
    scope: ScopeId,
}

impl ResolverSubspace {
    /// Build the subspace rooted at a resolved byte prefix.
    #[must_use]
    pub fn new(prefix: impl Into<ScopeId>) -> Self {
        Self {
            scope: prefix.into(),
        }
    }

    /// The scope identity (the raw prefix).
    #[must_use]
    pub const fn scope(&self) -> &ScopeId {
        &self.scope
    }

    fn child(&self, area: u8) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.scope.as_bytes().len() + 1);
        key.extend_from_slice(self.scope.as_bytes());
        key.push(area);
        key
    }

    /// Key of the forward entry for `key`.
    #[must_use]
    pub fn mapping_key(&self, key: &str) -> Vec<u8> {
        let mut out = self.child(MAPPING);
        Element::Str(key.to_owned()).encode_into(&mut out);
        out
    }

    /// Key of the reverse entry for `value`.
    #[must_use]
    pub fn reverse_key(&self, value: u64) -> Vec<u8> {
        let mut out = self.child(REVERSE);
        Element::U64(value).encode_into(&mut out);
        out
    }

    /// Key of the scope's single state record.
    #[must_use]
    pub fn state_key(&self) -> Vec<u8> {
        self.child(STATE)
    }

    /// Key of the allocation-floor counter.
    #[must_use]
    pub fn counter_key(&self) -> Vec<u8> {
        let mut out = self.child(STATE);
        Element::Str(ALLOC.to_owned()).encode_into(&mut out);
        out
    }

    /// Key of the allocation claim for `value`.
    #[must_use]
    pub fn claim_key(&self, value: u64) -> Vec<u8> {
        let mut out = self.counter_key();
        Element::U64(value).encode_into(&mut out);
        out
    }

    /// Half-open key range covering every forward entry of this scope.
    #[must_use]
    pub fn mapping_range(&self) -> (Vec<u8>, Vec<u8>) {
        area_range(self.child(MAPPING))
    }

    /// Half-open key range covering every reverse entry of this scope.
    #[must_use]
    pub fn reverse_range(&self) -> (Vec<u8>, Vec<u8>) {
        area_range(self.child(REVERSE))
    }
}

impl From<ScopeId> for ResolverSubspace {
    fn from(scope: ScopeId) -> Self {
        Self { scope }
    }
}

fn area_range(lo: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let mut hi = lo.clone();
    // The last byte is the area tag (0x00..0x02), so the increment cannot carry.
    if let Some(last) = hi.last_mut() {
        *last += 1;
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subspace() -> ResolverSubspace {
        ResolverSubspace::new(ScopeId::new(vec![0xAA, 0xBB]))
    }

    #[test]
    fn areas_are_disjoint() {
        let s = subspace();
        let mapping = s.mapping_key("k");
        let reverse = s.reverse_key(1);
        let state = s.state_key();
        assert_eq!(&mapping[..3], &[0xAA, 0xBB, 0x00]);
        assert_eq!(&reverse[..3], &[0xAA, 0xBB, 0x01]);
        assert_eq!(state, vec![0xAA, 0xBB, 0x02]);
    }

    #[test]
    fn equal_prefixes_make_equal_subspaces() {
        let a = ResolverSubspace::new(ScopeId::new(vec![1, 2]));
        let b = ResolverSubspace::new(ScopeId::new(vec![1, 2]));
        assert_eq!(a, b);
        assert_eq!(a.mapping_key("x"), b.mapping_key("x"));
    }

    #[test]
    fn claim_keys_extend_the_counter_key() {
        let s = subspace();
        assert!(s.claim_key(9).starts_with(&s.counter_key()));
        assert_ne!(s.claim_key(9), s.counter_key());
    }

    #[test]
    fn mapping_range_covers_exactly_the_mapping_area() {
        let s = subspace();
        let (lo, hi) = s.mapping_range();
        let key = s.mapping_key("anything");
        assert!(key >= lo && key < hi);
        assert!(s.reverse_key(0) >= hi);
        assert!(s.state_key() >= hi);
    }

}
