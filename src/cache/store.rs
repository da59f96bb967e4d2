//! Item store implementation

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tokio::sync::Notify;

use super::entry::{Item, RawSnapshot};
use super::error::{CacheError, Result};

/// Bounds every cache key satisfies.
///
/// `Ord` gives reduced snapshots a stable order when two items share a
/// creation time; `Debug` is used to render keys in errors and logs.
pub trait CacheKey: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static {}

impl<K> CacheKey for K where K: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static {}

/// Identifies one scheduled expiry.
pub(crate) type TimerId = u64;

struct Slot<T> {
  item: Item<T>,
  /// Expiry that owns this slot, if it was stored with a timeout
  timer: Option<TimerId>,
}

/// Keyed raw values behind a single lock.
///
/// Every successful mutation wakes the change monitor. Wake-ups are
/// coalesced: any number of mutations between two monitor cycles leave a
/// single pending notification.
pub struct ItemStore<K, T> {
  data: Mutex<HashMap<K, Slot<T>>>,
  changed: Notify,
}

impl<K: CacheKey, T: Clone> Default for ItemStore<K, T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: CacheKey, T: Clone> ItemStore<K, T> {
  pub fn new() -> Self {
    Self {
      data: Mutex::new(HashMap::new()),
      changed: Notify::new(),
    }
  }

  /// Insert a new item; fails if the key is already present.
  pub fn insert(&self, key: K, data: T) -> Result<()> {
    self.insert_slot(key, data, None)
  }

  pub(crate) fn insert_with_timer(&self, key: K, data: T, timer: TimerId) -> Result<()> {
    self.insert_slot(key, data, Some(timer))
  }

  fn insert_slot(&self, key: K, data: T, timer: Option<TimerId>) -> Result<()> {
    {
      let mut map = self.data.lock();
      if map.contains_key(&key) {
        return Err(CacheError::duplicate_key(&key));
      }
      map.insert(
        key,
        Slot {
          item: Item::new(data),
          timer,
        },
      );
    }
    self.signal();
    Ok(())
  }

  pub fn get(&self, key: &K) -> Result<Item<T>> {
    let map = self.data.lock();
    map
      .get(key)
      .map(|slot| slot.item.clone())
      .ok_or_else(|| CacheError::not_found(key))
  }

  pub fn contains(&self, key: &K) -> bool {
    self.data.lock().contains_key(key)
  }

  /// Copy every item under the lock.
  pub fn snapshot(&self) -> RawSnapshot<K, T> {
    let map = self.data.lock();
    map
      .iter()
      .map(|(k, slot)| (k.clone(), slot.item.clone()))
      .collect()
  }

  /// Replace an item's data in place. Returns false if the key is absent.
  pub fn update(&self, key: &K, data: T) -> bool {
    let updated = {
      let mut map = self.data.lock();
      match map.get_mut(key) {
        Some(slot) => {
          slot.item.replace(data);
          true
        }
        None => false,
      }
    };
    if updated {
      self.signal();
    }
    updated
  }

  /// Remove an item, handing back its expiry so the caller can cancel it.
  pub(crate) fn remove(&self, key: &K) -> Result<(Item<T>, Option<TimerId>)> {
    let slot = self
      .data
      .lock()
      .remove(key)
      .ok_or_else(|| CacheError::not_found(key))?;
    self.signal();
    Ok((slot.item, slot.timer))
  }

  /// Remove an item only if it is still owned by `timer`.
  ///
  /// Returns `None` when the key was deleted, or deleted and stored again,
  /// after the timer was armed.
  pub(crate) fn expire(&self, key: &K, timer: TimerId) -> Option<Item<T>> {
    let item = {
      let mut map = self.data.lock();
      match map.get(key) {
        Some(slot) if slot.timer == Some(timer) => map.remove(key).map(|slot| slot.item),
        _ => None,
      }
    };
    if item.is_some() {
      self.signal();
    }
    item
  }

  pub fn len(&self) -> usize {
    self.data.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.lock().is_empty()
  }

  /// Wait until the store has been mutated since the last wake-up.
  pub async fn changed(&self) {
    self.changed.notified().await
  }

  fn signal(&self) {
    self.changed.notify_one();
  }
}
