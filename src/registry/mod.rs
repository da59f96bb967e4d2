//! Named stores of named caches
//!
//! A [`Registry`] owns any number of [`Store`]s, and each store owns a set of
//! caches with possibly different key and element types plus a
//! [`Commands`] table. Registries are plain values; several can coexist.

mod commands;

pub use commands::{Command, Commands};

use parking_lot::RwLock;
use std::any::{self, Any};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{Cache, CacheConfig, CacheKey};

/// Name of a store within a registry.
pub type StoreKey = String;

/// Name of a cache within a store.
pub type CacheName = String;

/// Registry operation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("store already exists: {0}")]
  StoreExists(String),
  #[error("no store with key: {0}")]
  NoStore(String),
  #[error("cache already exists: {0}")]
  CacheExists(String),
  #[error("no cache with key: {0}")]
  NoCache(String),
  #[error("cache {key} holds {registered}, not {requested}")]
  TypeMismatch {
    key: String,
    registered: &'static str,
    requested: &'static str,
  },
  #[error("no command with key: {0}")]
  NoCommand(String),
}

/// Object-safe view of a `Cache<K, T, U>` with its type parameters erased.
trait ErasedCache: Send + Sync {
  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
  fn type_name(&self) -> &'static str;
  fn close(&self);
}

impl<K, T, U> ErasedCache for Cache<K, T, U>
where
  K: CacheKey,
  T: Clone + Send + Sync + 'static,
  U: PartialEq + Send + Sync + 'static,
{
  fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }

  fn type_name(&self) -> &'static str {
    any::type_name::<Self>()
  }

  fn close(&self) {
    Cache::close(self)
  }
}

/// A named group of caches and commands.
pub struct Store {
  key: StoreKey,
  caches: RwLock<HashMap<CacheName, Arc<dyn ErasedCache>>>,
  commands: Commands,
}

impl Store {
  fn new(key: StoreKey) -> Self {
    Self {
      key,
      caches: RwLock::new(HashMap::new()),
      commands: Commands::new(),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Create a cache with the default configuration.
  pub fn new_cache<K, T, U>(&self, key: &str) -> Result<Arc<Cache<K, T, U>>, RegistryError>
  where
    K: CacheKey,
    T: Clone + Send + Sync + 'static,
    U: PartialEq + Send + Sync + 'static,
  {
    self.new_cache_with_config(key, CacheConfig::default())
  }

  pub fn new_cache_with_config<K, T, U>(
    &self,
    key: &str,
    config: CacheConfig,
  ) -> Result<Arc<Cache<K, T, U>>, RegistryError>
  where
    K: CacheKey,
    T: Clone + Send + Sync + 'static,
    U: PartialEq + Send + Sync + 'static,
  {
    let mut caches = self.caches.write();
    if caches.contains_key(key) {
      return Err(RegistryError::CacheExists(key.to_string()));
    }
    let cache = Arc::new(Cache::<K, T, U>::with_config(config));
    caches.insert(key.to_string(), cache.clone());
    tracing::info!("Store {}: cache {} created", self.key, key);
    Ok(cache)
  }

  /// Look up a cache, checking that it was created with the same types.
  pub fn use_cache<K, T, U>(&self, key: &str) -> Result<Arc<Cache<K, T, U>>, RegistryError>
  where
    K: CacheKey,
    T: Clone + Send + Sync + 'static,
    U: PartialEq + Send + Sync + 'static,
  {
    let erased = self
      .caches
      .read()
      .get(key)
      .cloned()
      .ok_or_else(|| RegistryError::NoCache(key.to_string()))?;
    let registered = erased.type_name();
    erased
      .as_any()
      .downcast::<Cache<K, T, U>>()
      .map_err(|_| RegistryError::TypeMismatch {
        key: key.to_string(),
        registered,
        requested: any::type_name::<Cache<K, T, U>>(),
      })
  }

  /// Remove a cache and close it. Handles still held elsewhere stay
  /// readable but lose their monitor, timers and feeds.
  pub fn remove_cache(&self, key: &str) -> Result<(), RegistryError> {
    let cache = self
      .caches
      .write()
      .remove(key)
      .ok_or_else(|| RegistryError::NoCache(key.to_string()))?;
    cache.close();
    tracing::info!("Store {}: cache {} removed", self.key, key);
    Ok(())
  }

  pub fn contains_cache(&self, key: &str) -> bool {
    self.caches.read().contains_key(key)
  }

  /// Cache names, sorted.
  pub fn cache_keys(&self) -> Vec<CacheName> {
    let mut keys: Vec<_> = self.caches.read().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn commands(&self) -> &Commands {
    &self.commands
  }

  /// Shorthand for `commands().execute(key)`.
  pub fn execute(&self, key: &str) -> Result<(), RegistryError> {
    self.commands.execute(key)
  }

  fn close_all(&self) {
    let drained: Vec<_> = self.caches.write().drain().collect();
    for (_, cache) in drained {
      cache.close();
    }
  }
}

/// Owner of named stores.
#[derive(Default)]
pub struct Registry {
  stores: RwLock<HashMap<StoreKey, Arc<Store>>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn new_store(&self, key: &str) -> Result<Arc<Store>, RegistryError> {
    let mut stores = self.stores.write();
    if stores.contains_key(key) {
      return Err(RegistryError::StoreExists(key.to_string()));
    }
    let store = Arc::new(Store::new(key.to_string()));
    stores.insert(key.to_string(), store.clone());
    tracing::info!("Store {} created", key);
    Ok(store)
  }

  pub fn use_store(&self, key: &str) -> Result<Arc<Store>, RegistryError> {
    self
      .stores
      .read()
      .get(key)
      .cloned()
      .ok_or_else(|| RegistryError::NoStore(key.to_string()))
  }

  /// Remove a store from the registry and close its caches.
  /// Returns false if no store had that key.
  pub fn detach_store(&self, key: &str) -> bool {
    let removed = self.stores.write().remove(key);
    match removed {
      Some(store) => {
        store.close_all();
        tracing::info!("Store {} detached", key);
        true
      }
      None => false,
    }
  }

  /// Store names, sorted.
  pub fn store_keys(&self) -> Vec<StoreKey> {
    let mut keys: Vec<_> = self.stores.read().keys().cloned().collect();
    keys.sort();
    keys
  }
}
