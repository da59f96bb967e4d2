//! Per-item expiry timers

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::store::{CacheKey, ItemStore, TimerId};

/// Called with the last stored value when an item expires.
pub type ExpireCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Owns one cancellable task per `put_with_timeout`.
///
/// A timer only removes the item it was armed for: the store records the
/// timer id next to the item, so a key that was deleted (and possibly
/// stored again) before the timer fires is left alone and the callback is
/// never run.
pub struct TimeoutScheduler {
  next_id: AtomicU64,
  timers: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
}

impl Default for TimeoutScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl TimeoutScheduler {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(1),
      timers: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub(crate) fn next_id(&self) -> TimerId {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Arm timer `id` for `key`. The item must already be stored under `id`.
  pub(crate) fn schedule<K, T>(
    &self,
    runtime: &Handle,
    id: TimerId,
    key: K,
    ttl: Duration,
    store: Arc<ItemStore<K, T>>,
    on_expire: ExpireCallback<T>,
  ) where
    K: CacheKey,
    T: Clone + Send + 'static,
  {
    let timers = Arc::clone(&self.timers);
    // Held while spawning so the task cannot deregister before it is registered.
    let mut pending = self.timers.lock();
    let handle = runtime.spawn(async move {
      tokio::time::sleep(ttl).await;
      timers.lock().remove(&id);

      match store.expire(&key, id) {
        Some(item) => {
          tracing::debug!("Cache item {:?} expired after {:?}", key, ttl);
          on_expire(item.data);
        }
        None => {
          tracing::debug!("Expiry for {:?} skipped, item already removed", key);
        }
      }
    });
    pending.insert(id, handle);
  }

  /// Cancel a pending timer. Returns false if it already fired or never existed.
  pub(crate) fn cancel(&self, id: TimerId) -> bool {
    match self.timers.lock().remove(&id) {
      Some(handle) => {
        handle.abort();
        true
      }
      None => false,
    }
  }

  /// Cancel every pending timer, returning how many were still armed.
  pub fn cancel_all(&self) -> usize {
    let drained: Vec<_> = self.timers.lock().drain().collect();
    let count = drained.len();
    for (_, handle) in drained {
      handle.abort();
    }
    count
  }

  pub fn pending(&self) -> usize {
    self.timers.lock().len()
  }
}
