//! Core types for the keymint resolver: the order-preserving tuple encoding,
//! resolved paths and their subspaces, scope-qualified cache keys, and the
//! bit-stable state/result records.

pub mod path;
pub mod scope;
pub mod state;
pub mod subspace;
pub mod tuple;

pub use path::{PathElement, ResolvedPath};
pub use scope::{ScopeId, ScopedValue};
pub use state::{LockState, ResolverResult, ResolverState};
pub use subspace::ResolverSubspace;
pub use tuple::{pack, pack_str, pack_u64, unpack, DecodeError, Element};
