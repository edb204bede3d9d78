//! keymint: a transactional, scope-aware bidirectional directory.
//!
//! A [`Resolver`] interns opaque string keys as dense `u64` values (and
//! back) inside a namespace anchored at a resolved path of a shared ordered
//! key-value store. Uniqueness under concurrent writers rests on the
//! store's serializable transactions; read performance rests on bounded
//! per-process caches governed by a per-scope state version.
//!
//! ```
//! use std::sync::Arc;
//!
//! use keymint::{Resolver, ResolverContext};
//! use keymint_store::MemoryStore;
//!
//! let ctx = ResolverContext::with_defaults(Arc::new(MemoryStore::new()));
//! let resolver = Resolver::global(ctx);
//!
//! let value = resolver.resolve("foo")?;
//! assert_eq!(resolver.reverse_lookup(value)?, "foo");
//! # Ok::<(), keymint_error::KeymintError>(())
//! ```

mod alloc;
pub mod cache;
pub mod context;
mod mapping;
pub mod resolver;
mod state;

pub use cache::{ScopedCache, DEFAULT_CACHE_SIZE};
pub use context::{ResolverConfig, ResolverContext, DEFAULT_REFRESH_PERIOD};
pub use resolver::{
    MetadataHook, PreWriteCheck, Resolver, ResolverCreateHooks, ResolverScope,
};

pub use keymint_error::{ErrorKind, KeymintError, Result};
pub use keymint_types::{
    LockState, PathElement, ResolvedPath, ResolverResult, ResolverState, ScopeId, ScopedValue,
};
