//! Mnemo: reducible in-memory caches with change history and live feeds.
//!
//! ```no_run
//! use mnemo::Cache;
//!
//! # async fn demo() -> mnemo::cache::Result<()> {
//! let cache: Cache<String, i64> = Cache::new();
//! cache.put("a".to_string(), 3)?;
//! cache.set_reducer(|n: &i64| n * 2)?;
//! let mut reduced = cache.reduced_feed();
//! cache.put("b".to_string(), 4)?;
//! if let Some(record) = reduced.recv().await {
//!   println!("{} entries at {}", record.snapshot.len(), record.timestamp);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod registry;

pub use cache::{Cache, CacheConfig, CacheError, CacheStats, Feed, Item, OverflowPolicy};
pub use config::{LoggingSection, MnemoConfig};
pub use registry::{Registry, RegistryError, Store};
