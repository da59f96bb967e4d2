//! Bounded change feeds
//!
//! Each subscriber owns a bounded queue. Publishing clones the message into
//! every live queue; with [`OverflowPolicy::Drop`] a full queue loses that
//! message (and the loss is counted and logged), with
//! [`OverflowPolicy::Block`] the publisher waits for room.
//!
//! While nobody is subscribed, messages collect in a backlog of the same
//! capacity. The next subscriber receives the backlog first.

use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Notify};

use super::config::OverflowPolicy;

struct FeedState<M> {
  subscribers: Vec<mpsc::Sender<M>>,
  backlog: VecDeque<M>,
}

impl<M> FeedState<M> {
  /// Drop senders whose receiver is gone; returns true if any are left.
  fn prune(&mut self) -> bool {
    self.subscribers.retain(|tx| !tx.is_closed());
    !self.subscribers.is_empty()
  }
}

enum Step<'a, M> {
  Done,
  Wait(tokio::sync::futures::Notified<'a>),
  Deliver(Vec<mpsc::Sender<M>>),
}

/// Fan-out of feed messages to any number of subscribers.
pub struct FeedBroadcaster<M> {
  name: &'static str,
  capacity: usize,
  policy: OverflowPolicy,
  state: Mutex<FeedState<M>>,
  subscribed: Notify,
  closed: AtomicBool,
  published: AtomicU64,
  dropped: AtomicU64,
}

impl<M> FeedBroadcaster<M> {
  pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
    Self {
      name,
      capacity: capacity.max(1),
      policy,
      state: Mutex::new(FeedState {
        subscribers: Vec::new(),
        backlog: VecDeque::new(),
      }),
      subscribed: Notify::new(),
      closed: AtomicBool::new(false),
      published: AtomicU64::new(0),
      dropped: AtomicU64::new(0),
    }
  }

  /// Register a subscriber. It first receives any backlog held while the
  /// feed had no subscribers, then every message published from now on.
  ///
  /// Subscribing to a closed feed yields the remaining backlog, then `None`.
  pub fn subscribe(&self) -> Feed<M> {
    let (tx, rx) = mpsc::channel(self.capacity);
    let mut state = self.state.lock();
    // The backlog never exceeds the channel capacity.
    for msg in state.backlog.drain(..) {
      let _ = tx.try_send(msg);
    }
    // Checked under the lock so `close` cannot miss this sender.
    if !self.closed.load(Ordering::Acquire) {
      state.subscribers.push(tx);
      self.subscribed.notify_waiters();
    }
    Feed { rx }
  }

  /// Stop accepting messages and end every subscriber's stream. Idempotent.
  pub fn close(&self) {
    let mut state = self.state.lock();
    if !self.closed.swap(true, Ordering::AcqRel) {
      tracing::debug!(
        "{} feed closed ({} subscribers)",
        self.name,
        state.subscribers.len()
      );
    }
    state.subscribers.clear();
    self.subscribed.notify_waiters();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  pub fn policy(&self) -> OverflowPolicy {
    self.policy
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn subscriber_count(&self) -> usize {
    let mut state = self.state.lock();
    state.prune();
    state.subscribers.len()
  }

  /// Messages held for the next subscriber.
  pub fn buffered(&self) -> usize {
    self.state.lock().backlog.len()
  }

  /// Messages handed to `publish` while open.
  pub fn published(&self) -> u64 {
    self.published.load(Ordering::Relaxed)
  }

  /// Deliveries lost to full subscriber queues or a full backlog.
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  fn count_drop(&self, target: &str) {
    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::warn!(
      "{} feed {} full (capacity {}), message dropped ({} total)",
      self.name,
      target,
      self.capacity,
      dropped
    );
  }
}

impl<M: Clone + Send> FeedBroadcaster<M> {
  /// Deliver a message to all subscribers according to the overflow policy.
  pub async fn publish(&self, msg: M) {
    if self.closed.load(Ordering::Acquire) {
      return;
    }
    self.published.fetch_add(1, Ordering::Relaxed);

    match self.policy {
      OverflowPolicy::Drop => self.publish_or_drop(msg),
      OverflowPolicy::Block => self.publish_blocking(msg).await,
    }
  }

  fn publish_or_drop(&self, msg: M) {
    let mut state = self.state.lock();
    if !state.prune() {
      if state.backlog.len() < self.capacity {
        state.backlog.push_back(msg);
      } else {
        self.count_drop("backlog");
      }
      return;
    }
    state.subscribers.retain(|tx| match tx.try_send(msg.clone()) {
      Ok(()) => true,
      Err(mpsc::error::TrySendError::Full(_)) => {
        self.count_drop("subscriber");
        true
      }
      Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
  }

  async fn publish_blocking(&self, msg: M) {
    loop {
      // Decided under the lock; no lock is held across an await.
      let step = {
        let mut state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
          Step::Done
        } else if state.prune() {
          Step::Deliver(state.subscribers.clone())
        } else if state.backlog.len() < self.capacity {
          state.backlog.push_back(msg.clone());
          Step::Done
        } else {
          Step::Wait(self.subscribed.notified())
        }
      };

      match step {
        Step::Done => return,
        Step::Wait(subscribed) => {
          tracing::debug!("{} feed backlog full, waiting for a subscriber", self.name);
          subscribed.await;
        }
        Step::Deliver(senders) => {
          let mut delivered = false;
          for tx in senders {
            if tx.send(msg.clone()).await.is_ok() {
              delivered = true;
            }
          }
          if delivered {
            return;
          }
          // Every receiver went away mid-send: fall back to the backlog.
        }
      }
    }
  }
}

/// Receiving end of a feed subscription.
#[derive(Debug)]
pub struct Feed<M> {
  rx: mpsc::Receiver<M>,
}

impl<M> Feed<M> {
  /// Wait for the next message; `None` once the feed is closed and drained.
  pub async fn recv(&mut self) -> Option<M> {
    self.rx.recv().await
  }

  /// Take a message if one is queued.
  pub fn try_recv(&mut self) -> Option<M> {
    self.rx.try_recv().ok()
  }

  /// Number of queued messages.
  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }
}

impl<M> Stream for Feed<M> {
  type Item = M;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<M>> {
    self.rx.poll_recv(cx)
  }
}
