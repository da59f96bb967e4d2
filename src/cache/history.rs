//! Append-only history of raw and reduced snapshots

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::entry::{HistoryEntry, Timestamp};

struct Logs<R, D> {
  raw: BTreeMap<Timestamp, Arc<R>>,
  reduced: BTreeMap<Timestamp, Arc<D>>,
}

/// Two timestamp-indexed logs written by the change monitor.
///
/// Entries are never rewritten. With no `limit` the logs grow without bound;
/// with a limit the oldest entries of each log are dropped, which keeps raw
/// and reduced entries paired because both logs receive one entry per change.
pub struct HistoryLedger<R, D> {
  logs: Mutex<Logs<R, D>>,
  limit: Option<usize>,
}

impl<R, D> HistoryLedger<R, D> {
  pub fn new(limit: Option<usize>) -> Self {
    Self {
      logs: Mutex::new(Logs {
        raw: BTreeMap::new(),
        reduced: BTreeMap::new(),
      }),
      limit,
    }
  }

  /// Append one change: the raw entry, then the reduced entry, under a
  /// single lock so readers never see one without the other.
  pub fn record(&self, raw: HistoryEntry<R>, reduced: HistoryEntry<D>) {
    debug_assert_eq!(raw.timestamp, reduced.timestamp);
    let mut logs = self.logs.lock();
    debug_assert!(
      logs.raw.last_key_value().map_or(true, |(last, _)| *last < raw.timestamp),
      "history timestamps must increase"
    );
    logs.raw.insert(raw.timestamp, raw.snapshot);
    logs.reduced.insert(reduced.timestamp, reduced.snapshot);
    trim(&mut logs.raw, self.limit);
    trim(&mut logs.reduced, self.limit);
  }

  /// All raw entries, oldest first.
  pub fn raw_history(&self) -> Vec<HistoryEntry<R>> {
    collect(&self.logs.lock().raw)
  }

  /// All reduced entries, oldest first.
  pub fn reduced_history(&self) -> Vec<HistoryEntry<D>> {
    collect(&self.logs.lock().reduced)
  }

  pub fn raw_at(&self, timestamp: &Timestamp) -> Option<HistoryEntry<R>> {
    let logs = self.logs.lock();
    logs
      .raw
      .get(timestamp)
      .map(|s| HistoryEntry::new(*timestamp, Arc::clone(s)))
  }

  pub fn reduced_at(&self, timestamp: &Timestamp) -> Option<HistoryEntry<D>> {
    let logs = self.logs.lock();
    logs
      .reduced
      .get(timestamp)
      .map(|s| HistoryEntry::new(*timestamp, Arc::clone(s)))
  }

  pub fn latest_raw(&self) -> Option<HistoryEntry<R>> {
    let logs = self.logs.lock();
    logs
      .raw
      .last_key_value()
      .map(|(t, s)| HistoryEntry::new(*t, Arc::clone(s)))
  }

  pub fn latest_reduced(&self) -> Option<HistoryEntry<D>> {
    let logs = self.logs.lock();
    logs
      .reduced
      .last_key_value()
      .map(|(t, s)| HistoryEntry::new(*t, Arc::clone(s)))
  }

  /// Number of (raw, reduced) entries.
  pub fn len(&self) -> (usize, usize) {
    let logs = self.logs.lock();
    (logs.raw.len(), logs.reduced.len())
  }

  pub fn is_empty(&self) -> bool {
    let logs = self.logs.lock();
    logs.raw.is_empty() && logs.reduced.is_empty()
  }

  pub fn limit(&self) -> Option<usize> {
    self.limit
  }
}

fn trim<S>(log: &mut BTreeMap<Timestamp, Arc<S>>, limit: Option<usize>) {
  if let Some(limit) = limit {
    while log.len() > limit {
      log.pop_first();
    }
  }
}

fn collect<S>(log: &BTreeMap<Timestamp, Arc<S>>) -> Vec<HistoryEntry<S>> {
  log
    .iter()
    .map(|(t, s)| HistoryEntry::new(*t, Arc::clone(s)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  fn stamps(n: i64) -> Vec<Timestamp> {
    let base = Utc::now();
    (0..n).map(|i| base + Duration::milliseconds(i)).collect()
  }

  #[test]
  fn test_history_is_ordered() {
    let ledger: HistoryLedger<u32, String> = HistoryLedger::new(None);
    let ts = stamps(3);
    for (i, t) in ts.iter().enumerate() {
      ledger.record(
        HistoryEntry::new(*t, Arc::new(i as u32)),
        HistoryEntry::new(*t, Arc::new(i.to_string())),
      );
    }

    let raw = ledger.raw_history();
    let reduced = ledger.reduced_history();
    assert_eq!(raw.len(), 3);
    assert_eq!(reduced.len(), 3);
    for i in 0..3 {
      assert_eq!(raw[i].timestamp, ts[i]);
      assert_eq!(*raw[i].snapshot, i as u32);
      assert_eq!(reduced[i].timestamp, ts[i]);
    }
    assert_eq!(ledger.latest_raw().map(|e| *e.snapshot), Some(2));
    assert_eq!(
      ledger.reduced_at(&ts[1]).map(|e| e.snapshot.as_str().to_string()),
      Some("1".to_string())
    );
  }

  #[test]
  fn test_history_limit_trims_oldest_pairs() {
    let ledger: HistoryLedger<u32, u32> = HistoryLedger::new(Some(2));
    let ts = stamps(5);
    for (i, t) in ts.iter().enumerate() {
      ledger.record(
        HistoryEntry::new(*t, Arc::new(i as u32)),
        HistoryEntry::new(*t, Arc::new(i as u32)),
      );
    }
    assert_eq!(ledger.len(), (2, 2));
    let raw: Vec<_> = ledger.raw_history().iter().map(|e| e.timestamp).collect();
    let reduced: Vec<_> = ledger.reduced_history().iter().map(|e| e.timestamp).collect();
    assert_eq!(raw, vec![ts[3], ts[4]]);
    assert_eq!(raw, reduced);
    assert!(ledger.raw_at(&ts[0]).is_none());
  }

  #[test]
  fn test_concurrent_readers_see_pairs() {
    let ledger: Arc<HistoryLedger<u32, u32>> = Arc::new(HistoryLedger::new(Some(4)));
    let writer = {
      let ledger = Arc::clone(&ledger);
      std::thread::spawn(move || {
        let base = Utc::now();
        for i in 0..2000 {
          let at = base + Duration::microseconds(i);
          ledger.record(
            HistoryEntry::new(at, Arc::new(i as u32)),
            HistoryEntry::new(at, Arc::new(i as u32)),
          );
        }
      })
    };
    while !writer.is_finished() {
      let (raw, reduced) = ledger.len();
      assert_eq!(raw, reduced);
    }
    writer.join().unwrap();
    let raw: Vec<_> = ledger.raw_history().iter().map(|e| e.timestamp).collect();
    let reduced: Vec<_> = ledger.reduced_history().iter().map(|e| e.timestamp).collect();
    assert_eq!(raw, reduced);
  }

  #[test]
  fn test_empty_history() {
    let ledger: HistoryLedger<u32, u32> = HistoryLedger::new(None);
    assert!(ledger.is_empty());
    assert!(ledger.latest_reduced().is_none());
    assert_eq!(ledger.limit(), None);
  }
}
