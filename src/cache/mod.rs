//! Reducible in-memory caches
//!
//! A [`Cache`] stores keyed raw items and, once a reducer is registered,
//! keeps a derived view of them up to date:
//! - mutations wake a background change monitor
//! - the monitor reduces a fresh snapshot and detects changes by value
//! - every change is appended to the history ledger and published on the
//!   raw and reduced feeds
//! - items stored with a timeout are evicted by cancellable timers

pub mod config;
mod entry;
mod error;
mod feed;
mod history;
mod monitor;
mod reducer;
mod store;
mod timeout;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use config::{CacheConfig, OverflowPolicy};
pub use entry::{
  FeedMessage, HistoryEntry, Item, RawRecord, RawSnapshot, ReducedEntry, ReducedRecord,
  ReducedSnapshot, Timestamp, Timestamped,
};
pub use error::{CacheError, Result};
pub use feed::{Feed, FeedBroadcaster};
pub use history::HistoryLedger;
pub use reducer::{Reducer, ReducerFn};
pub use store::{CacheKey, ItemStore};
pub use timeout::{ExpireCallback, TimeoutScheduler};

use monitor::{ChangeMonitor, Ledger, MonitorCounters};

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
  pub items: usize,
  pub pending_timers: usize,
  pub raw_history: usize,
  pub reduced_history: usize,
  pub cycles: u64,
  pub changes: u64,
  pub reducer_failures: u64,
  pub raw_published: u64,
  pub reduced_published: u64,
  pub raw_dropped: u64,
  pub reduced_dropped: u64,
  pub raw_buffered: usize,
  pub reduced_buffered: usize,
  pub overflow: OverflowPolicy,
  pub reducer_configured: bool,
  pub closed: bool,
}

/// Keyed store of `T` values reduced to a view of `U` values.
///
/// Mutations run synchronously on the caller's thread. Timers and the
/// change monitor run on the Tokio runtime that was current when they were
/// started. Dropping the cache closes it.
pub struct Cache<K, T, U = T> {
  config: CacheConfig,
  store: Arc<ItemStore<K, T>>,
  ledger: Arc<Ledger<K, T, U>>,
  raw_feed: Arc<FeedBroadcaster<RawRecord<K, T>>>,
  reduced_feed: Arc<FeedBroadcaster<ReducedRecord<K, U>>>,
  timers: TimeoutScheduler,
  counters: Arc<MonitorCounters>,
  configured: AtomicBool,
  monitor: Mutex<Option<JoinHandle<()>>>,
  closed: AtomicBool,
}

impl<K, T, U> Cache<K, T, U>
where
  K: CacheKey,
  T: Clone + Send + Sync + 'static,
  U: PartialEq + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::with_config(CacheConfig::default())
  }

  pub fn with_config(config: CacheConfig) -> Self {
    let capacity = config.effective_feed_capacity();
    Self {
      store: Arc::new(ItemStore::new()),
      ledger: Arc::new(HistoryLedger::new(config.history_limit)),
      raw_feed: Arc::new(FeedBroadcaster::new("raw", capacity, config.overflow)),
      reduced_feed: Arc::new(FeedBroadcaster::new("reduced", capacity, config.overflow)),
      timers: TimeoutScheduler::new(),
      counters: Arc::new(MonitorCounters::default()),
      configured: AtomicBool::new(false),
      monitor: Mutex::new(None),
      closed: AtomicBool::new(false),
      config,
    }
  }

  /// Store `data` under a new key.
  pub fn put(&self, key: K, data: T) -> Result<()> {
    self.store.insert(key, data)
  }

  /// Store `data` and evict it after `ttl`, handing the last stored value
  /// to `on_expire`.
  ///
  /// Deleting the key first cancels the timer and `on_expire` never runs.
  /// Must be called from within a Tokio runtime.
  pub fn put_with_timeout<F>(&self, key: K, data: T, ttl: Duration, on_expire: F) -> Result<()>
  where
    F: FnOnce(T) + Send + 'static,
  {
    if ttl.is_zero() {
      return Err(CacheError::InvalidTimeout(ttl));
    }
    if self.is_closed() {
      return Err(CacheError::Closed);
    }
    let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

    let id = self.timers.next_id();
    self.store.insert_with_timer(key.clone(), data, id)?;
    self.timers.schedule(
      &runtime,
      id,
      key,
      ttl,
      Arc::clone(&self.store),
      Box::new(on_expire),
    );
    // Closed while arming: `close` may already have drained the timers.
    if self.is_closed() {
      self.timers.cancel(id);
    }
    Ok(())
  }

  pub fn get(&self, key: &K) -> Result<Item<T>> {
    self.store.get(key)
  }

  /// Copy of every stored item.
  pub fn get_all(&self) -> RawSnapshot<K, T> {
    self.store.snapshot()
  }

  /// Replace the data under `key`, keeping its creation time.
  /// Returns false if the key does not exist.
  pub fn update(&self, key: &K, data: T) -> bool {
    self.store.update(key, data)
  }

  /// Remove `key`, cancelling its expiry timer if it has one.
  pub fn delete(&self, key: &K) -> Result<()> {
    let (_, timer) = self.store.remove(key)?;
    if let Some(id) = timer {
      self.timers.cancel(id);
    }
    Ok(())
  }

  pub fn contains(&self, key: &K) -> bool {
    self.store.contains(key)
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }

  /// Register the reducer and start the change monitor.
  ///
  /// Returns once the initial raw and reduced snapshots are in the history;
  /// they are published on the feeds before any later change. A second
  /// call fails with [`CacheError::AlreadyConfigured`].
  ///
  /// A panic in `f` skips that reduction cycle and is counted in
  /// [`CacheStats::reducer_failures`]. The panic still passes through the
  /// process panic hook, which by default prints it to stderr.
  pub fn set_reducer<F>(&self, f: F) -> Result<()>
  where
    F: Fn(&T) -> U + Send + Sync + 'static,
  {
    self.install_reducer(Reducer::new(f))
  }

  fn install_reducer(&self, reducer: Reducer<T, U>) -> Result<()> {
    if self.is_closed() {
      return Err(CacheError::Closed);
    }
    let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
    if self.configured.swap(true, Ordering::AcqRel) {
      return Err(CacheError::AlreadyConfigured);
    }

    let monitor = ChangeMonitor::new(
      Arc::clone(&self.store),
      Arc::new(reducer),
      Arc::clone(&self.ledger),
      Arc::clone(&self.raw_feed),
      Arc::clone(&self.reduced_feed),
      Arc::clone(&self.counters),
    );
    let handle = monitor.start(&runtime);
    *self.monitor.lock() = Some(handle);

    if self.is_closed() {
      if let Some(handle) = self.monitor.lock().take() {
        handle.abort();
      }
    }
    Ok(())
  }

  /// Subscribe to raw snapshots.
  ///
  /// Records published while the feed had no subscriber are held, up to the
  /// feed capacity, and delivered to the next subscriber first.
  pub fn raw_feed(&self) -> Feed<RawRecord<K, T>> {
    self.raw_feed.subscribe()
  }

  /// Subscribe to reduced snapshots. Buffers like [`Cache::raw_feed`].
  pub fn reduced_feed(&self) -> Feed<ReducedRecord<K, U>> {
    self.reduced_feed.subscribe()
  }

  /// Every recorded raw snapshot, oldest first.
  pub fn raw_history(&self) -> Vec<RawRecord<K, T>> {
    self.ledger.raw_history()
  }

  /// Every recorded reduced snapshot, oldest first.
  pub fn reduced_history(&self) -> Vec<ReducedRecord<K, U>> {
    self.ledger.reduced_history()
  }

  pub fn history(&self) -> &HistoryLedger<RawSnapshot<K, T>, ReducedSnapshot<K, U>> {
    &self.ledger
  }

  pub fn stats(&self) -> CacheStats {
    let (raw_history, reduced_history) = self.ledger.len();
    CacheStats {
      items: self.store.len(),
      pending_timers: self.timers.pending(),
      raw_history,
      reduced_history,
      cycles: self.counters.cycles.load(Ordering::Relaxed),
      changes: self.counters.changes.load(Ordering::Relaxed),
      reducer_failures: self.counters.failures.load(Ordering::Relaxed),
      raw_published: self.raw_feed.published(),
      reduced_published: self.reduced_feed.published(),
      raw_dropped: self.raw_feed.dropped(),
      reduced_dropped: self.reduced_feed.dropped(),
      raw_buffered: self.raw_feed.buffered(),
      reduced_buffered: self.reduced_feed.buffered(),
      overflow: self.config.overflow,
      reducer_configured: self.has_reducer(),
      closed: self.is_closed(),
    }
  }
}

impl<K, T> Cache<K, T, T>
where
  K: CacheKey,
  T: Clone + PartialEq + Send + Sync + 'static,
{
  /// Use a reducer that passes every value through unchanged.
  pub fn set_default_reducer(&self) -> Result<()> {
    self.install_reducer(Reducer::identity())
  }
}

impl<K, T, U> Cache<K, T, U> {
  /// Stop the change monitor, cancel pending timers and close both feeds.
  ///
  /// Idempotent. Stored items and history stay readable.
  pub fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(handle) = self.monitor.lock().take() {
      handle.abort();
    }
    let cancelled = self.timers.cancel_all();
    self.raw_feed.close();
    self.reduced_feed.close();
    tracing::info!("Cache closed, {} pending timers cancelled", cancelled);
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub fn has_reducer(&self) -> bool {
    self.configured.load(Ordering::Acquire)
  }

  /// Active feed overflow policy.
  pub fn overflow_policy(&self) -> OverflowPolicy {
    self.config.overflow
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }
}

impl<K, T, U> Default for Cache<K, T, U>
where
  K: CacheKey,
  T: Clone + Send + Sync + 'static,
  U: PartialEq + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, T, U> Drop for Cache<K, T, U> {
  fn drop(&mut self) {
    self.close();
  }
}
