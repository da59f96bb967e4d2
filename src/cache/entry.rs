//! Cache entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Point in time used for item creation and history stamps.
pub type Timestamp = DateTime<Utc>;

/// A cached value together with the time it was first stored.
///
/// `created_at` survives updates; only `data` is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<T> {
  pub created_at: Timestamp,
  pub data: T,
}

impl<T> Item<T> {
  pub fn new(data: T) -> Self {
    Self {
      created_at: Utc::now(),
      data,
    }
  }

  /// Replace the payload, keeping the original creation time.
  pub fn replace(&mut self, data: T) -> T {
    std::mem::replace(&mut self.data, data)
  }
}

/// One element of a reduction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedEntry<K, U> {
  pub key: K,
  pub created_at: Timestamp,
  pub data: U,
}

/// Copy of the item store taken under its lock.
pub type RawSnapshot<K, T> = HashMap<K, Item<T>>;

/// Output of one reduction pass, ordered by `created_at` ascending.
pub type ReducedSnapshot<K, U> = Vec<ReducedEntry<K, U>>;

/// A snapshot stamped with the time the change was detected.
///
/// The same shape is stored in the history ledger and sent on the feeds; the
/// snapshot sits behind an `Arc` so fan-out never deep-copies it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Timestamped<S> {
  pub timestamp: Timestamp,
  pub snapshot: Arc<S>,
}

impl<S> Timestamped<S> {
  pub fn new(timestamp: Timestamp, snapshot: Arc<S>) -> Self {
    Self {
      timestamp,
      snapshot,
    }
  }
}

// Manual impl: cloning only bumps the `Arc`, so `S` need not be `Clone`.
impl<S> Clone for Timestamped<S> {
  fn clone(&self) -> Self {
    Self {
      timestamp: self.timestamp,
      snapshot: Arc::clone(&self.snapshot),
    }
  }
}

impl<S: PartialEq> PartialEq for Timestamped<S> {
  fn eq(&self, other: &Self) -> bool {
    self.timestamp == other.timestamp && self.snapshot == other.snapshot
  }
}

/// History ledger record.
pub type HistoryEntry<S> = Timestamped<S>;

/// Message delivered on a feed.
pub type FeedMessage<S> = Timestamped<S>;

/// Raw feed / history payload for a cache keyed by `K` holding `T`.
pub type RawRecord<K, T> = Timestamped<RawSnapshot<K, T>>;

/// Reduced feed / history payload for a cache keyed by `K` reducing to `U`.
pub type ReducedRecord<K, U> = Timestamped<ReducedSnapshot<K, U>>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_item_replace_keeps_created_at() {
    let mut item = Item::new(1);
    let created = item.created_at;
    let old = item.replace(2);
    assert_eq!(old, 1);
    assert_eq!(item.data, 2);
    assert_eq!(item.created_at, created);
  }

  #[test]
  fn test_item_wire_field_names() {
    let item = Item::new("hello".to_string());
    let json = serde_json::to_value(&item).unwrap();
    assert!(json.get("created_at").is_some());
    assert_eq!(json["data"], "hello");

    let entry = ReducedEntry {
      key: "a".to_string(),
      created_at: item.created_at,
      data: 5,
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["key"], "a");
    assert_eq!(json["data"], 5);
    assert!(json.get("created_at").is_some());
  }

  #[test]
  fn test_timestamped_clone_shares_snapshot() {
    let record: ReducedRecord<String, i32> = Timestamped::new(Utc::now(), Arc::new(Vec::new()));
    let copy = record.clone();
    assert!(Arc::ptr_eq(&record.snapshot, &copy.snapshot));
    assert_eq!(record, copy);
  }
}
