//! Cache configuration

use serde::{Deserialize, Serialize};

/// What a feed does when a subscriber's queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
  /// Drop the message for that subscriber and log it
  #[default]
  Drop,
  /// Wait for the subscriber to make room; stalls the change monitor
  Block,
}

impl std::str::FromStr for OverflowPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "drop" | "drop-and-log" | "drop_and_log" => Ok(OverflowPolicy::Drop),
      "block" | "blocking" => Ok(OverflowPolicy::Block),
      _ => Err(format!("Unknown overflow policy: {}", s)),
    }
  }
}

impl std::fmt::Display for OverflowPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OverflowPolicy::Drop => write!(f, "drop"),
      OverflowPolicy::Block => write!(f, "block"),
    }
  }
}

/// Per-cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
  /// Queue capacity of every feed subscriber (default: 1024)
  #[serde(default = "default_feed_capacity")]
  pub feed_capacity: usize,

  /// Behavior when a subscriber queue is full
  #[serde(default)]
  pub overflow: OverflowPolicy,

  /// Maximum entries kept per history log (None = unbounded)
  #[serde(default)]
  pub history_limit: Option<usize>,
}

fn default_feed_capacity() -> usize {
  1024
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      feed_capacity: default_feed_capacity(),
      overflow: OverflowPolicy::default(),
      history_limit: None,
    }
  }
}

impl CacheConfig {
  pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
    self.overflow = overflow;
    self
  }

  pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
    self.feed_capacity = capacity;
    self
  }

  pub fn with_history_limit(mut self, limit: usize) -> Self {
    self.history_limit = Some(limit);
    self
  }

  /// Capacity handed to tokio, which rejects zero-sized channels.
  pub(crate) fn effective_feed_capacity(&self) -> usize {
    self.feed_capacity.max(1)
  }
}
