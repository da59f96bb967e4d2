//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSection;

/// Install a global fmt subscriber. `RUST_LOG` overrides the configured
/// level. Returns false if a subscriber was already installed.
pub fn init(logging: &LoggingSection) -> bool {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer())
    .try_init()
    .is_ok()
}
