//! The resolver engine: read-then-create protocol, pre-write checks,
//! locking enforcement, and the admin operations.

use std::fmt;
use std::sync::Arc;

use keymint_error::{KeymintError, Result};
use keymint_store::{run, Transaction, TransactionOptions};
use keymint_types::{
    LockState, ResolvedPath, ResolverResult, ResolverState, ResolverSubspace, ScopeId, ScopedValue,
};
use tracing::{debug, info};

use crate::context::ResolverContext;
use crate::{alloc, mapping, state};

/// Pre-write check: evaluated before each create; `false` rejects it.
pub type PreWriteCheck = Arc<dyn Fn(&Resolver) -> bool + Send + Sync>;

/// Metadata hook: produces the immutable metadata stored with a new entry.
pub type MetadataHook = Arc<dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync>;

/// Caller-supplied hooks consulted when a resolve has to create an entry.
///
/// Both run only on the create path; a resolve that finds an existing entry
/// invokes neither. They must be side-effect-free with respect to the
/// resolver, and may run more than once if the creating transaction
/// retries.
#[derive(Clone)]
pub struct ResolverCreateHooks {
    pre_write_check: PreWriteCheck,
    metadata_hook: MetadataHook,
}

impl ResolverCreateHooks {
    /// Hooks from explicit parts.
    #[must_use]
    pub fn new(pre_write_check: PreWriteCheck, metadata_hook: MetadataHook) -> Self {
        Self {
            pre_write_check,
            metadata_hook,
        }
    }

    /// The default check accepts every write.
    #[must_use]
    pub fn with_check(pre_write_check: PreWriteCheck) -> Self {
        Self {
            pre_write_check,
            ..Self::default()
        }
    }

    /// The default hook stores no metadata.
    #[must_use]
    pub fn with_metadata_hook(metadata_hook: MetadataHook) -> Self {
        Self {
            metadata_hook,
            ..Self::default()
        }
    }
}

impl Default for ResolverCreateHooks {
    fn default() -> Self {
        Self {
            pre_write_check: Arc::new(|_| true),
            metadata_hook: Arc::new(|_| None),
        }
    }
}

impl fmt::Debug for ResolverCreateHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverCreateHooks").finish_non_exhaustive()
    }
}

/// Where a resolver is anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverScope {
    /// The root of the key-space.
    Global,
    /// A resolved path; its serialization is the scope prefix.
    Scoped(ResolvedPath),
}

/// A scope-aware bidirectional directory of interned keys.
///
/// Handles are cheap to clone and safe to share across threads. Two
/// handles over the same resolved path are the same scope: they read and
/// write the same entries and share cache state through their context.
#[derive(Clone)]
pub struct Resolver {
    scope: ResolverScope,
    subspace: ResolverSubspace,
    ctx: Arc<ResolverContext>,
}

/// Scope equality: same resolved prefix, regardless of handle or context.
impl PartialEq for Resolver {
    fn eq(&self, other: &Self) -> bool {
        self.subspace == other.subspace
    }
}

impl Eq for Resolver {}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            ResolverScope::Global => f.write_str("resolver(global)"),
            ResolverScope::Scoped(path) => write!(f, "resolver({path})"),
        }
    }
}

enum ResolveOutcome {
    Existing(ResolverResult),
    Created(ResolverResult),
}

impl Resolver {
    /// The resolver at the root of the key-space.
    #[must_use]
    pub fn global(ctx: Arc<ResolverContext>) -> Self {
        Self {
            scope: ResolverScope::Global,
            subspace: ResolverSubspace::new(ScopeId::new(ResolvedPath::root().prefix())),
            ctx,
        }
    }

    /// A resolver anchored at `path`.
    #[must_use]
    pub fn scoped(ctx: Arc<ResolverContext>, path: ResolvedPath) -> Self {
        let subspace = ResolverSubspace::new(ScopeId::new(path.prefix()));
        Self {
            scope: ResolverScope::Scoped(path),
            subspace,
            ctx,
        }
    }

    /// This resolver's scope identity (the resolved byte prefix).
    #[must_use]
    pub fn scope_id(&self) -> &ScopeId {
        self.subspace.scope()
    }

    /// Qualify `key` with this scope for use in caller-owned caches.
    #[must_use]
    pub fn wrap(&self, key: impl Into<String>) -> ScopedValue<String> {
        self.scope_id().wrap(key.into())
    }

    // --- Resolution ---

    /// Resolve `key` to its value, creating the mapping if absent.
    pub fn resolve(&self, key: &str) -> Result<u64> {
        self.resolve_with_metadata(key, &ResolverCreateHooks::default())
            .map(|result| result.value())
    }

    /// Resolve `key` with hooks consulted on create.
    pub fn resolve_with_hooks(&self, key: &str, hooks: &ResolverCreateHooks) -> Result<u64> {
        self.resolve_with_metadata(key, hooks).map(|r| r.value())
    }

    /// Resolve `key` to its value and metadata, creating if absent.
    pub fn resolve_with_metadata(
        &self,
        key: &str,
        hooks: &ResolverCreateHooks,
    ) -> Result<ResolverResult> {
        self.resolve_with_options(key, hooks, &TransactionOptions::default())
    }

    /// [`Self::resolve_with_metadata`] with caller-supplied transaction
    /// limits (deadline, cancellation).
    pub fn resolve_with_options(
        &self,
        key: &str,
        hooks: &ResolverCreateHooks,
        opts: &TransactionOptions,
    ) -> Result<ResolverResult> {
        self.ctx.metrics().record_wait_directory_resolve();
        self.refresh_state_if_stale(opts)?;

        if let Some(hit) = self
            .ctx
            .forward_cache()
            .get(self.scope_id(), key.to_owned())
        {
            return Ok(hit);
        }

        let mut observed_state = None;
        let outcome = run(self.ctx.store(), opts, |txn| {
            if let Some(existing) =
                mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())?
            {
                return Ok(ResolveOutcome::Existing(existing));
            }

            // Absent: this is a create, which must observe the lock state
            // and window transactionally.
            let scope_state = state::read_state(txn, &self.subspace, self.ctx.metrics())?;
            observed_state = Some(scope_state);
            if !scope_state.lock.is_writable() {
                return Err(KeymintError::NotWritable);
            }
            if !(hooks.pre_write_check)(self) {
                return Err(KeymintError::PreWriteCheckFailed);
            }
            let metadata = (hooks.metadata_hook)(key);

            let value = alloc::allocate(
                txn,
                &self.subspace,
                scope_state.window_high,
                self.ctx.metrics(),
            )?;
            let result = ResolverResult::new(value, metadata);
            mapping::write_pair(txn, &self.subspace, key, &result);
            Ok(ResolveOutcome::Created(result))
        })?;

        if let Some(scope_state) = observed_state {
            self.ctx.note_state(self.scope_id(), scope_state);
        }
        let result = match outcome {
            ResolveOutcome::Existing(result) => result,
            ResolveOutcome::Created(result) => {
                self.ctx.metrics().record_commit();
                info!(resolver = %self, key, value = result.value(), "created mapping");
                result
            }
        };
        self.populate_caches(key, &result);
        Ok(result)
    }

    /// Resolve `key`, failing with `NotFound` if absent. Never creates and
    /// never runs hooks.
    pub fn must_resolve(&self, key: &str) -> Result<u64> {
        self.must_resolve_with_metadata(key).map(|r| r.value())
    }

    /// Like [`Self::must_resolve`] but returns metadata as well.
    pub fn must_resolve_with_metadata(&self, key: &str) -> Result<ResolverResult> {
        let opts = TransactionOptions::default();
        self.refresh_state_if_stale(&opts)?;
        if let Some(hit) = self
            .ctx
            .forward_cache()
            .get(self.scope_id(), key.to_owned())
        {
            return Ok(hit);
        }

        let found = run(self.ctx.store(), &opts, |txn| {
            mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())
        })?;
        match found {
            Some(result) => {
                self.populate_caches(key, &result);
                Ok(result)
            }
            None => Err(KeymintError::key_not_found(key)),
        }
    }

    /// Map `value` back to its key, failing with `NotFound` if it was never
    /// assigned in this scope.
    pub fn reverse_lookup(&self, value: u64) -> Result<String> {
        let opts = TransactionOptions::default();
        self.refresh_state_if_stale(&opts)?;
        if let Some(hit) = self.ctx.reverse_cache().get(self.scope_id(), value) {
            return Ok(hit);
        }

        let found = run(self.ctx.store(), &opts, |txn| {
            mapping::read_reverse(txn, &self.subspace, value, self.ctx.metrics())
        })?;
        match found {
            Some(key) => {
                self.ctx
                    .reverse_cache()
                    .insert(self.scope_id(), value, key.clone());
                Ok(key)
            }
            None => Err(KeymintError::value_not_found(value)),
        }
    }

    // --- Caller-transaction operations ---

    /// Read the forward entry for `key` within `txn`. Never creates.
    pub fn read(&self, txn: &mut dyn Transaction, key: &str) -> Result<Option<ResolverResult>> {
        mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())
    }

    /// Unconditionally create a mapping for `key` within `txn`.
    ///
    /// Fails with `Conflict` if the key already has a mapping. The caller
    /// owns the transaction, so nothing is cached until it commits.
    pub fn create(
        &self,
        txn: &mut dyn Transaction,
        key: &str,
        metadata: Option<&[u8]>,
    ) -> Result<ResolverResult> {
        if mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())?.is_some() {
            return Err(KeymintError::AlreadyExists {
                key: key.to_owned(),
            });
        }
        let scope_state = state::read_state(txn, &self.subspace, self.ctx.metrics())?;
        if !scope_state.lock.is_writable() {
            return Err(KeymintError::NotWritable);
        }
        let value = alloc::allocate(txn, &self.subspace, scope_state.window_high, self.ctx.metrics())?;
        let result = ResolverResult::new(value, metadata.map(<[u8]>::to_vec));
        mapping::write_pair(txn, &self.subspace, key, &result);
        Ok(result)
    }

    /// Install the mapping `key → value` within `txn`.
    ///
    /// Idempotent when the existing mapping matches exactly; a divergent
    /// forward or reverse entry is a conflict. Both directions are written
    /// in the caller's transaction.
    pub fn set_mapping(&self, txn: &mut dyn Transaction, key: &str, value: u64) -> Result<()> {
        let forward = mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())?;
        let reverse = mapping::read_reverse(txn, &self.subspace, value, self.ctx.metrics())?;

        match (forward, reverse) {
            (Some(existing), _) if existing.value() != value => Err(KeymintError::ValueMismatch {
                key: key.to_owned(),
                existing: existing.value(),
                requested: value,
            }),
            (_, Some(existing_key)) if existing_key != key => {
                Err(KeymintError::ReverseKeyMismatch {
                    value,
                    existing: existing_key,
                    requested: key.to_owned(),
                })
            }
            (Some(_), Some(_)) => Ok(()),
            (None, None) => {
                let result = ResolverResult::new(value, None);
                mapping::write_pair(txn, &self.subspace, key, &result);
                debug!(resolver = %self, key, value, "installed explicit mapping");
                Ok(())
            }
            (Some(_), None) => Err(KeymintError::corrupt(format!(
                "forward entry for '{key}' has no reverse twin at {value}"
            ))),
            (None, Some(_)) => Err(KeymintError::corrupt(format!(
                "reverse entry for {value} has no forward twin at '{key}'"
            ))),
        }
    }

    // --- Administration ---

    /// Raise the allocation floor so every later-created value is `>= w`.
    /// Existing mappings are untouched.
    pub fn set_window(&self, w: u64) -> Result<()> {
        let opts = TransactionOptions::default();
        let new_state = run(self.ctx.store(), &opts, |txn| {
            let mut scope_state = state::read_state(txn, &self.subspace, self.ctx.metrics())?;
            alloc::raise_floor(txn, &self.subspace, w)?;
            scope_state.window_high = scope_state.window_high.max(w);
            scope_state.bump_version();
            state::write_state(txn, &self.subspace, &scope_state);
            Ok(scope_state)
        })?;
        self.ctx.metrics().record_commit();
        info!(resolver = %self, window = w, "raised allocation window");
        self.ctx.note_state(self.scope_id(), new_state);
        Ok(())
    }

    /// Bump the state version, invalidating every process's caches for this
    /// scope within the staleness bound.
    pub fn increment_version(&self) -> Result<()> {
        self.admin_update("incremented version", |_| Ok(()))
    }

    /// The scope's state version, read through the bounded-staleness cache.
    pub fn get_version(&self) -> Result<u32> {
        Ok(self.current_state(&TransactionOptions::default())?.version)
    }

    /// Block creation of new entries. Existing entries stay resolvable.
    pub fn enable_write_lock(&self) -> Result<()> {
        self.admin_update("enabled write lock", |scope_state| {
            if scope_state.lock == LockState::Retired {
                return Err(KeymintError::NotWritable);
            }
            scope_state.lock = LockState::WriteLocked;
            Ok(())
        })
    }

    /// Re-allow creation of new entries.
    pub fn disable_write_lock(&self) -> Result<()> {
        self.admin_update("disabled write lock", |scope_state| {
            if scope_state.lock == LockState::Retired {
                return Err(KeymintError::NotWritable);
            }
            scope_state.lock = LockState::Unlocked;
            Ok(())
        })
    }

    /// Permanently retire this scope. Requires the scope to be unlocked;
    /// among concurrent callers exactly one succeeds.
    pub fn exclusive_lock(&self) -> Result<()> {
        self.admin_update("took exclusive lock", |scope_state| {
            if scope_state.lock != LockState::Unlocked {
                return Err(KeymintError::ExclusiveLockContested);
            }
            scope_state.lock = LockState::Retired;
            Ok(())
        })
    }

    /// Replace the metadata of an existing entry and bump the state version
    /// so caches everywhere refresh.
    pub fn update_metadata_and_version(&self, key: &str, metadata: Option<&[u8]>) -> Result<()> {
        let opts = TransactionOptions::default();
        let new_state = run(self.ctx.store(), &opts, |txn| {
            let existing = mapping::read_forward(txn, &self.subspace, key, self.ctx.metrics())?
                .ok_or_else(|| KeymintError::key_not_found(key))?;
            let updated = ResolverResult::new(existing.value(), metadata.map(<[u8]>::to_vec));
            txn.set(&self.subspace.mapping_key(key), &updated.encode());

            let mut scope_state = state::read_state(txn, &self.subspace, self.ctx.metrics())?;
            scope_state.bump_version();
            state::write_state(txn, &self.subspace, &scope_state);
            Ok(scope_state)
        })?;
        self.ctx.metrics().record_commit();
        info!(resolver = %self, key, "updated metadata");
        self.ctx.note_state(self.scope_id(), new_state);
        Ok(())
    }

    // --- Internals ---

    fn admin_update(
        &self,
        action: &'static str,
        apply: impl Fn(&mut ResolverState) -> Result<()>,
    ) -> Result<()> {
        let opts = TransactionOptions::default();
        let new_state = run(self.ctx.store(), &opts, |txn| {
            let mut scope_state = state::read_state(txn, &self.subspace, self.ctx.metrics())?;
            apply(&mut scope_state)?;
            scope_state.bump_version();
            state::write_state(txn, &self.subspace, &scope_state);
            Ok(scope_state)
        })?;
        self.ctx.metrics().record_commit();
        info!(resolver = %self, version = new_state.version, "{action}");
        self.ctx.note_state(self.scope_id(), new_state);
        Ok(())
    }

    /// The scope's state, from cache when fresh, otherwise re-read.
    fn current_state(&self, opts: &TransactionOptions) -> Result<ResolverState> {
        if let Some(cached) = self.ctx.fresh_state(self.scope_id()) {
            return Ok(cached);
        }
        let scope_state = run(self.ctx.store(), opts, |txn| {
            state::read_state(txn, &self.subspace, self.ctx.metrics())
        })?;
        self.ctx.note_state(self.scope_id(), scope_state);
        Ok(scope_state)
    }

    fn refresh_state_if_stale(&self, opts: &TransactionOptions) -> Result<()> {
        self.current_state(opts).map(|_| ())
    }

    fn populate_caches(&self, key: &str, result: &ResolverResult) {
        self.ctx
            .forward_cache()
            .insert(self.scope_id(), key.to_owned(), result.clone());
        self.ctx
            .reverse_cache()
            .insert(self.scope_id(), result.value(), key.to_owned());
    }
}
