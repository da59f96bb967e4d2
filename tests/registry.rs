//! Registry and command table tests

mod common;

use common::{init_tracing, next};
use mnemo::cache::CacheConfig;
use mnemo::{OverflowPolicy, Registry, RegistryError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::assert_ok;

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_new_and_use_store() {
  let registry = Registry::new();
  let created = assert_ok!(registry.new_store("main"));
  let found = assert_ok!(registry.use_store("main"));
  assert!(Arc::ptr_eq(&created, &found));
  assert_eq!(found.key(), "main");

  assert!(matches!(
    registry.new_store("main"),
    Err(RegistryError::StoreExists(key)) if key == "main"
  ));
  assert!(matches!(
    registry.use_store("other"),
    Err(RegistryError::NoStore(key)) if key == "other"
  ));
}

#[test]
fn test_detach_store_closes_caches() {
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  let cache = store.new_cache::<String, i64, i64>("numbers").unwrap();
  cache.put("a".to_string(), 1).unwrap();

  assert!(registry.detach_store("main"));
  assert!(cache.is_closed());
  assert!(registry.store_keys().is_empty());
  // Data stays readable through handles held elsewhere.
  assert_eq!(cache.get(&"a".to_string()).unwrap().data, 1);
}

// =============================================================================
// Cache Tests
// =============================================================================

#[tokio::test]
async fn test_cache_shared_through_store() {
  init_tracing();
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  let writer = store.new_cache::<String, i64, String>("labels").unwrap();

  let reader = store.use_cache::<String, i64, String>("labels").unwrap();
  let mut reduced = reader.reduced_feed();
  writer.set_reducer(|n: &i64| format!("n={}", n)).unwrap();
  next(&mut reduced).await;

  writer.put("x".to_string(), 4).unwrap();
  let change = next(&mut reduced).await;
  assert_eq!(change.snapshot[0].data, "n=4");
  assert_eq!(reader.reduced_history().len(), 2);
}

#[test]
fn test_cache_with_config_and_listing() {
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  let config = CacheConfig::default().with_overflow(OverflowPolicy::Block);
  store
    .new_cache_with_config::<u64, String, String>("b", config)
    .unwrap();
  store.new_cache::<u64, String, usize>("a").unwrap();

  assert_eq!(store.cache_keys(), vec!["a", "b"]);
  let blocking = store.use_cache::<u64, String, String>("b").unwrap();
  assert_eq!(blocking.overflow_policy(), OverflowPolicy::Block);
  assert!(store.contains_cache("a"));
}

#[test]
fn test_use_cache_with_wrong_types() {
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  store.new_cache::<String, i64, i64>("numbers").unwrap();

  let err = store
    .use_cache::<String, i64, String>("numbers")
    .err()
    .unwrap();
  assert!(matches!(err, RegistryError::TypeMismatch { .. }));
  assert!(err.to_string().contains("numbers"));
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_commands_assign_execute_keys() {
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  let hits = Arc::new(AtomicUsize::new(0));

  let bump = Arc::clone(&hits);
  let reset = Arc::clone(&hits);
  store.commands().assign([
    (
      "bump",
      Box::new(move || {
        bump.fetch_add(1, Ordering::SeqCst);
      }) as Box<dyn Fn() + Send + Sync>,
    ),
    (
      "reset",
      Box::new(move || reset.store(0, Ordering::SeqCst)) as Box<dyn Fn() + Send + Sync>,
    ),
  ]);
  assert_eq!(store.commands().keys(), vec!["bump", "reset"]);

  store.execute("bump").unwrap();
  store.execute("bump").unwrap();
  assert_eq!(hits.load(Ordering::SeqCst), 2);
  store.execute("reset").unwrap();
  assert_eq!(hits.load(Ordering::SeqCst), 0);

  assert_eq!(
    store.execute("missing"),
    Err(RegistryError::NoCommand("missing".to_string()))
  );
}

#[test]
fn test_command_can_drive_a_cache() {
  let registry = Registry::new();
  let store = registry.new_store("main").unwrap();
  let cache = store.new_cache::<&'static str, i64, i64>("counter").unwrap();
  cache.put("hits", 0).unwrap();

  let target = Arc::clone(&cache);
  store.commands().register("hit", move || {
    let current = target.get(&"hits").map(|item| item.data).unwrap_or(0);
    target.update(&"hits", current + 1);
  });
  for _ in 0..3 {
    store.execute("hit").unwrap();
  }
  assert_eq!(cache.get(&"hits").unwrap().data, 3);
}
