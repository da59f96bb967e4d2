//! Cache error types

use std::time::Duration;
use thiserror::Error;

/// Cache operation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  #[error("duplicate cache key: {0}")]
  DuplicateKey(String),
  #[error("no cache with key: {0}")]
  NotFound(String),
  #[error("invalid timeout {0:?}: timeout must be greater than 0")]
  InvalidTimeout(Duration),
  #[error("reducer already configured")]
  AlreadyConfigured,
  #[error("reducer failed: {0}")]
  ReducerFailure(String),
  #[error("cache is closed")]
  Closed,
  #[error("no tokio runtime available")]
  NoRuntime,
}

impl CacheError {
  pub(crate) fn duplicate_key<K: std::fmt::Debug>(key: &K) -> Self {
    CacheError::DuplicateKey(format!("{:?}", key))
  }

  pub(crate) fn not_found<K: std::fmt::Debug>(key: &K) -> Self {
    CacheError::NotFound(format!("{:?}", key))
  }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
