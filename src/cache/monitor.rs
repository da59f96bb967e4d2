//! Change monitor
//!
//! One background task per cache. It sleeps until the item store reports a
//! mutation, snapshots and reduces the store, and when the reduced output
//! differs from the previous one it appends both snapshots to the history
//! ledger and publishes them, always in the order raw-record,
//! reduced-record, raw-publish, reduced-publish.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::entry::{
  RawRecord, RawSnapshot, ReducedRecord, ReducedSnapshot, Timestamp, Timestamped,
};
use super::feed::FeedBroadcaster;
use super::history::HistoryLedger;
use super::reducer::Reducer;
use super::store::{CacheKey, ItemStore};

pub(crate) type Ledger<K, T, U> = HistoryLedger<RawSnapshot<K, T>, ReducedSnapshot<K, U>>;

/// Cycle counters shared with the owning cache.
#[derive(Debug, Default)]
pub(crate) struct MonitorCounters {
  pub cycles: AtomicU64,
  pub changes: AtomicU64,
  pub failures: AtomicU64,
}

pub(crate) struct ChangeMonitor<K, T, U> {
  store: Arc<ItemStore<K, T>>,
  reducer: Arc<Reducer<T, U>>,
  ledger: Arc<Ledger<K, T, U>>,
  raw_feed: Arc<FeedBroadcaster<RawRecord<K, T>>>,
  reduced_feed: Arc<FeedBroadcaster<ReducedRecord<K, U>>>,
  counters: Arc<MonitorCounters>,
  baseline: Option<Arc<ReducedSnapshot<K, U>>>,
  last_stamp: Option<Timestamp>,
}

impl<K, T, U> ChangeMonitor<K, T, U>
where
  K: CacheKey,
  T: Clone + Send + Sync + 'static,
  U: PartialEq + Send + Sync + 'static,
{
  pub(crate) fn new(
    store: Arc<ItemStore<K, T>>,
    reducer: Arc<Reducer<T, U>>,
    ledger: Arc<Ledger<K, T, U>>,
    raw_feed: Arc<FeedBroadcaster<RawRecord<K, T>>>,
    reduced_feed: Arc<FeedBroadcaster<ReducedRecord<K, U>>>,
    counters: Arc<MonitorCounters>,
  ) -> Self {
    Self {
      store,
      reducer,
      ledger,
      raw_feed,
      reduced_feed,
      counters,
      baseline: None,
      last_stamp: None,
    }
  }

  /// Record the initial snapshot pair on the caller's thread, then spawn the
  /// task that publishes it and follows later changes.
  ///
  /// Mutations racing with this call are not lost: the store keeps a pending
  /// wake-up until the task first waits on it.
  pub(crate) fn start(mut self, runtime: &Handle) -> JoinHandle<()> {
    let initial = self.initial_cycle();
    tracing::info!("Change monitor started ({} items)", self.store.len());
    runtime.spawn(async move {
      if let Some((raw, reduced)) = initial {
        self.publish(raw, reduced).await;
      }
      self.run().await;
    })
  }

  fn initial_cycle(&mut self) -> Option<(RawRecord<K, T>, ReducedRecord<K, U>)> {
    self.counters.cycles.fetch_add(1, Ordering::Relaxed);
    let raw = self.store.snapshot();
    match self.reducer.reduce(&raw) {
      Ok(reduced) => Some(self.commit(raw, reduced)),
      Err(e) => {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Initial reduction failed, waiting for next change: {}", e);
        None
      }
    }
  }

  async fn run(mut self) {
    loop {
      self.store.changed().await;
      self.cycle().await;
    }
  }

  /// One reduction pass. Returns true if a change was recorded.
  async fn cycle(&mut self) -> bool {
    self.counters.cycles.fetch_add(1, Ordering::Relaxed);
    let raw = self.store.snapshot();
    let reduced = match self.reducer.reduce(&raw) {
      Ok(reduced) => reduced,
      Err(e) => {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Skipping reduction cycle: {}", e);
        return false;
      }
    };

    if self.baseline.as_deref() == Some(&reduced) {
      tracing::trace!("Reduced snapshot unchanged");
      return false;
    }

    let (raw, reduced) = self.commit(raw, reduced);
    self.publish(raw, reduced).await;
    true
  }

  fn commit(
    &mut self,
    raw: RawSnapshot<K, T>,
    reduced: ReducedSnapshot<K, U>,
  ) -> (RawRecord<K, T>, ReducedRecord<K, U>) {
    let timestamp = self.next_timestamp();
    let raw = Timestamped::new(timestamp, Arc::new(raw));
    let reduced = Timestamped::new(timestamp, Arc::new(reduced));

    self.ledger.record(raw.clone(), reduced.clone());
    self.baseline = Some(Arc::clone(&reduced.snapshot));
    self.counters.changes.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
      "Recorded change at {} ({} items)",
      timestamp,
      reduced.snapshot.len()
    );
    (raw, reduced)
  }

  async fn publish(&self, raw: RawRecord<K, T>, reduced: ReducedRecord<K, U>) {
    self.raw_feed.publish(raw).await;
    self.reduced_feed.publish(reduced).await;
  }

  /// Wall-clock time, nudged forward when the clock has not advanced past
  /// the previous stamp.
  fn next_timestamp(&mut self) -> Timestamp {
    let mut now = Utc::now();
    if let Some(last) = self.last_stamp {
      if now <= last {
        now = last + chrono::Duration::nanoseconds(1);
      }
    }
    self.last_stamp = Some(now);
    now
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::config::OverflowPolicy;

  struct Harness {
    store: Arc<ItemStore<&'static str, i32>>,
    ledger: Arc<Ledger<&'static str, i32, i32>>,
    monitor: ChangeMonitor<&'static str, i32, i32>,
  }

  fn harness() -> Harness {
    let store = Arc::new(ItemStore::new());
    let ledger = Arc::new(HistoryLedger::new(None));
    let monitor = ChangeMonitor::new(
      Arc::clone(&store),
      Arc::new(Reducer::identity()),
      Arc::clone(&ledger),
      Arc::new(FeedBroadcaster::new("raw", 8, OverflowPolicy::Drop)),
      Arc::new(FeedBroadcaster::new("reduced", 8, OverflowPolicy::Drop)),
      Arc::new(MonitorCounters::default()),
    );
    Harness {
      store,
      ledger,
      monitor,
    }
  }

  #[tokio::test]
  async fn test_cycle_records_only_changes() {
    let Harness {
      store,
      ledger,
      mut monitor,
    } = harness();
    assert!(monitor.initial_cycle().is_some());

    assert!(!monitor.cycle().await);
    store.insert("a", 1).unwrap();
    assert!(monitor.cycle().await);
    assert!(!monitor.cycle().await);
    store.update(&"a", 1);
    assert!(!monitor.cycle().await);

    assert_eq!(ledger.len(), (2, 2));
    assert_eq!(monitor.counters.cycles.load(Ordering::Relaxed), 5);
    assert_eq!(monitor.counters.changes.load(Ordering::Relaxed), 2);
  }

  #[test]
  fn test_timestamps_strictly_increase() {
    let Harness { mut monitor, .. } = harness();
    let mut last = monitor.next_timestamp();
    for _ in 0..1000 {
      let next = monitor.next_timestamp();
      assert!(next > last);
      last = next;
    }
  }

  #[tokio::test]
  async fn test_failed_reduction_keeps_baseline() {
    let store = Arc::new(ItemStore::new());
    let ledger = Arc::new(HistoryLedger::new(None));
    let mut monitor = ChangeMonitor::new(
      Arc::clone(&store),
      Arc::new(Reducer::new(|n: &i32| {
        assert!(*n >= 0, "negative value");
        *n
      })),
      Arc::clone(&ledger),
      Arc::new(FeedBroadcaster::new("raw", 8, OverflowPolicy::Drop)),
      Arc::new(FeedBroadcaster::new("reduced", 8, OverflowPolicy::Drop)),
      Arc::new(MonitorCounters::default()),
    );
    store.insert("a", 1).unwrap();
    assert!(monitor.initial_cycle().is_some());

    store.update(&"a", -1);
    assert!(!monitor.cycle().await);
    assert_eq!(monitor.counters.failures.load(Ordering::Relaxed), 1);
    assert_eq!(ledger.len(), (1, 1));

    store.update(&"a", 2);
    assert!(monitor.cycle().await);
    let latest = ledger.latest_reduced().unwrap();
    assert_eq!(latest.snapshot[0].data, 2);
  }
}
