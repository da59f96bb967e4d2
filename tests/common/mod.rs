//! Shared helpers for integration tests
#![allow(dead_code)]

use mnemo::Feed;
use std::future::Future;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route tracing output through the test harness. `RUST_LOG` selects levels.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// Next feed message, failing the test if none arrives within a second.
pub async fn next<M>(feed: &mut Feed<M>) -> M {
  match tokio::time::timeout(Duration::from_secs(1), feed.recv()).await {
    Ok(Some(msg)) => msg,
    Ok(None) => panic!("feed closed"),
    Err(_) => panic!("timed out waiting for feed message"),
  }
}

/// True if nothing arrives on the feed for a short while.
pub async fn quiet<M>(feed: &mut Feed<M>) -> bool {
  tokio::time::timeout(Duration::from_millis(50), feed.recv())
    .await
    .is_err()
}

/// Poll `check` until it holds, failing after a second.
pub async fn eventually<F, Fut>(mut check: F)
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  for _ in 0..100 {
    if check().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not met within a second");
}
