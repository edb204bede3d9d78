//! Cache coherence and store-traffic contracts.
//!
//! These tests pin down how much store traffic each operation is allowed to
//! generate: which paths must commit, which must re-read the state record,
//! and which must be served entirely from cache.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keymint::{Resolver, ResolverConfig, ResolverContext, ResolvedPath, ScopedValue};
use keymint_store::MemoryStore;

fn context(store: &Arc<MemoryStore>, refresh: Duration) -> Arc<ResolverContext> {
    ResolverContext::new(
        Arc::clone(store) as Arc<dyn keymint_store::TransactionalStore>,
        ResolverConfig::with_refresh_period(refresh),
    )
}

#[test]
fn creating_resolve_commits_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    resolver.resolve("brand-new-key").unwrap();
    assert_eq!(ctx.metrics().snapshot().commit, 1);

    ctx.metrics().reset();
    resolver.resolve("another-new-key").unwrap();
    assert_eq!(ctx.metrics().snapshot().commit, 1);
}

#[test]
fn resolving_an_existing_key_never_commits() {
    let store = Arc::new(MemoryStore::new());
    Resolver::global(context(&store, Duration::from_secs(30)))
        .resolve("persisted")
        .unwrap();

    // A fresh process re-reads the committed mapping without writing.
    let cold_ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&cold_ctx));
    resolver.resolve("persisted").unwrap();
    assert_eq!(cold_ctx.metrics().snapshot().commit, 0);
}

#[test]
fn mappings_persist_without_the_caller_committing_anything() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    let mut mappings = HashMap::new();
    for i in 0..10 {
        let key = format!("string-{i}");
        mappings.insert(key.clone(), resolver.resolve(&key).unwrap());
    }

    // A different process with cold caches reads everything back.
    let cold_ctx = context(&store, Duration::from_secs(30));
    let cold = Resolver::global(Arc::clone(&cold_ctx));
    for (key, value) in &mappings {
        assert_eq!(cold.resolve(key).unwrap(), *value);
        assert_eq!(cold.reverse_lookup(*value).unwrap(), *key);
    }
    assert_eq!(
        cold_ctx.forward_cache().hit_count(),
        0,
        "values came from the store, not the cache"
    );
}

#[test]
fn creates_check_state_transactionally_but_reads_do_not() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    resolver.resolve("something").unwrap();
    assert!(
        ctx.metrics().snapshot().resolver_state_read >= 1,
        "first resolve must check the lock in the store"
    );

    // Every create re-checks the state record inside its transaction.
    ctx.metrics().reset();
    let mut last = 0;
    for i in 0..10 {
        resolver.resolve(&format!("something-{i}")).unwrap();
        let now = ctx.metrics().snapshot().resolver_state_read;
        assert!(now > last, "create {i} did not check the state record");
        last = now;
    }

    // Cached keys need no state reads at all.
    ctx.metrics().reset();
    for i in 0..10 {
        resolver.resolve(&format!("something-{i}")).unwrap();
    }
    assert_eq!(ctx.metrics().snapshot().resolver_state_read, 0);

    // A fresh process loads the state record once for the scope.
    let cold_ctx = context(&store, Duration::from_secs(30));
    let cold = Resolver::global(Arc::clone(&cold_ctx));
    cold.resolve("something").unwrap();
    assert_eq!(cold_ctx.metrics().snapshot().resolver_state_read, 1);
}

#[test]
fn get_version_reads_once_per_scope_per_refresh_period() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver1 = Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("resolver1"));
    let resolver2 = Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("resolver2"));

    for _ in 0..10 {
        resolver1.get_version().unwrap();
    }
    assert_eq!(ctx.metrics().snapshot().resolver_state_read, 1);

    resolver2.get_version().unwrap();
    assert_eq!(
        ctx.metrics().snapshot().resolver_state_read,
        2,
        "a different scope needs its own read"
    );

    // A new handle over the same path shares the cached state.
    let resolver1_again =
        Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("resolver1"));
    for _ in 0..10 {
        resolver1_again.get_version().unwrap();
    }
    assert_eq!(ctx.metrics().snapshot().resolver_state_read, 2);
}

#[test]
fn version_is_zero_until_incremented_and_propagates() {
    let store = Arc::new(MemoryStore::new());
    let contexts: Vec<_> = (0..5)
        .map(|_| context(&store, Duration::from_millis(100)))
        .collect();
    let resolvers: Vec<_> = contexts
        .iter()
        .map(|ctx| Resolver::global(Arc::clone(ctx)))
        .collect();

    for resolver in &resolvers {
        assert_eq!(resolver.get_version().unwrap(), 0);
    }

    resolvers[0].increment_version().unwrap();
    std::thread::sleep(Duration::from_millis(120));
    for resolver in &resolvers {
        assert_eq!(resolver.get_version().unwrap(), 1);
    }

    resolvers[0].increment_version().unwrap();
    std::thread::sleep(Duration::from_millis(120));
    for resolver in &resolvers {
        assert_eq!(resolver.get_version().unwrap(), 2);
    }
}

#[test]
fn reverse_lookups_are_cached_after_one_miss() {
    let store = Arc::new(MemoryStore::new());
    let value = Resolver::global(context(&store, Duration::from_secs(30)))
        .resolve("something")
        .unwrap();

    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    assert_eq!(resolver.reverse_lookup(value).unwrap(), "something");
    assert_eq!(ctx.reverse_cache().miss_count(), 1);
    assert_eq!(ctx.reverse_cache().hit_count(), 0);

    for _ in 0..10 {
        assert_eq!(resolver.reverse_lookup(value).unwrap(), "something");
    }
    assert_eq!(ctx.reverse_cache().hit_count(), 10);
    assert_eq!(ctx.reverse_cache().miss_count(), 1);
}

#[test]
fn scoped_wrap_keys_external_caches_by_prefix() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver1 = Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("path1"));
    let resolver2 = Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("path2"));

    let mut cache: HashMap<ScopedValue<String>, u64> = HashMap::new();
    cache.insert(resolver1.wrap("stuff"), 1);

    assert_eq!(cache.get(&resolver1.wrap("stuff")), Some(&1));
    assert_eq!(cache.get(&resolver1.wrap("missing")), None);
    assert_eq!(cache.get(&resolver2.wrap("stuff")), None);

    let fresh_handle = Resolver::scoped(Arc::clone(&ctx), ResolvedPath::root().child("path1"));
    assert_eq!(
        cache.get(&fresh_handle.wrap("stuff")),
        Some(&1),
        "scoping follows the resolved prefix, not the handle"
    );
}

#[test]
fn clear_caches_forces_the_next_resolve_back_to_the_store() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    let value = resolver.resolve("k").unwrap();
    ctx.clear_caches();

    ctx.metrics().reset();
    assert_eq!(resolver.resolve("k").unwrap(), value);
    let snap = ctx.metrics().snapshot();
    assert_eq!(snap.directory_read, 1);
    assert_eq!(snap.resolver_state_read, 1, "state cache was dropped too");
}

#[test]
fn every_cached_entry_matches_a_persisted_mapping() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    let mut allocations = HashSet::new();
    for i in 0..50 {
        let key = format!("string-{i}");
        allocations.insert((key.clone(), resolver.resolve(&key).unwrap()));
    }

    // Read every mapping back through a cold process and compare.
    let cold = Resolver::global(context(&store, Duration::from_secs(30)));
    for (key, value) in &allocations {
        assert_eq!(cold.must_resolve(key).unwrap(), *value);
        assert_eq!(cold.reverse_lookup(*value).unwrap(), *key);
    }
    assert_eq!(allocations.len(), 50, "all fifty keys allocated distinct values");
}

#[test]
fn wait_metric_counts_every_resolve_call() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&store, Duration::from_secs(30));
    let resolver = Resolver::global(Arc::clone(&ctx));

    resolver.resolve("a").unwrap();
    resolver.resolve("a").unwrap();
    resolver.resolve("b").unwrap();
    assert_eq!(ctx.metrics().snapshot().wait_directory_resolve, 3);
}
