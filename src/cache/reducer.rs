//! Reducer pipeline

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::entry::{RawSnapshot, ReducedEntry, ReducedSnapshot};
use super::error::{CacheError, Result};
use super::store::CacheKey;

/// User supplied element-wise reduction.
pub type ReducerFn<T, U> = dyn Fn(&T) -> U + Send + Sync;

/// Wraps a user reducer so it runs over whole raw snapshots.
///
/// The function must be pure: the change monitor relies on identical raw
/// snapshots producing identical reduced snapshots.
pub struct Reducer<T, U> {
  f: Box<ReducerFn<T, U>>,
}

impl<T, U> Reducer<T, U> {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&T) -> U + Send + Sync + 'static,
  {
    Self { f: Box::new(f) }
  }

  /// Apply the reducer to every item, keeping each key and creation time.
  ///
  /// The result is sorted by `created_at`, ties broken by key, so equal raw
  /// snapshots always reduce to equal sequences. A panic inside the user
  /// function is reported as [`CacheError::ReducerFailure`].
  pub fn reduce<K: CacheKey>(&self, raw: &RawSnapshot<K, T>) -> Result<ReducedSnapshot<K, U>> {
    // The process panic hook still runs first, so each caught panic is also
    // printed to stderr unless the caller installs a quieter hook.
    panic::catch_unwind(AssertUnwindSafe(|| {
      let mut reduced: ReducedSnapshot<K, U> = raw
        .iter()
        .map(|(key, item)| ReducedEntry {
          key: key.clone(),
          created_at: item.created_at,
          data: (self.f)(&item.data),
        })
        .collect();
      reduced.sort_by(|a, b| {
        a.created_at
          .cmp(&b.created_at)
          .then_with(|| a.key.cmp(&b.key))
      });
      reduced
    }))
    .map_err(|payload| CacheError::ReducerFailure(panic_message(payload.as_ref())))
  }
}

impl<T: Clone + 'static> Reducer<T, T> {
  /// Reducer that passes every value through unchanged.
  pub fn identity() -> Self {
    Self::new(T::clone)
  }
}

impl<T, U> std::fmt::Debug for Reducer<T, U> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Reducer").finish_non_exhaustive()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    (*msg).to_string()
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.clone()
  } else {
    "reducer panicked".to_string()
  }
}
