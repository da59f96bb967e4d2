//! Crate configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cache::CacheConfig;

/// Config file names probed by [`MnemoConfig::find_and_load`], in order.
pub const CONFIG_FILES: [&str; 2] = ["mnemo.yaml", "mnemo.yml"];

/// Replace `${VAR}` and `$VAR` references with environment values.
/// Unset variables expand to the empty string; an unterminated `${` is kept.
fn expand_env_vars(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      match braced.find('}') {
        Some(end) => {
          out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
          rest = &braced[end + 1..];
        }
        None => {
          out.push_str(&rest[pos..]);
          return out;
        }
      }
      continue;
    }

    let name_len = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if name_len == 0 {
      out.push('$');
    } else {
      out.push_str(&std::env::var(&after[..name_len]).unwrap_or_default());
    }
    rest = &after[name_len..];
  }

  out.push_str(rest);
  out
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
  /// Default filter directive when `RUST_LOG` is unset.
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MnemoConfig {
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingSection,
}

impl MnemoConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  /// Parse YAML after expanding environment references.
  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    Ok(serde_yaml::from_str(&expand_env_vars(content))?)
  }

  /// Load the first config file found in the working directory.
  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    Self::find_and_load_in(".")
  }

  pub fn find_and_load_in(dir: impl AsRef<Path>) -> Result<Option<Self>, anyhow::Error> {
    for name in CONFIG_FILES {
      let path = dir.as_ref().join(name);
      if path.exists() {
        tracing::info!("Loading config from {}", path.display());
        return Ok(Some(Self::from_file(&path)?));
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::OverflowPolicy;

  #[test]
  fn test_expand_env_vars() {
    std::env::set_var("MNEMO_TEST_LEVEL", "debug");
    std::env::remove_var("MNEMO_TEST_UNSET");
    assert_eq!(expand_env_vars("level: ${MNEMO_TEST_LEVEL}"), "level: debug");
    assert_eq!(expand_env_vars("level: $MNEMO_TEST_LEVEL!"), "level: debug!");
    assert_eq!(expand_env_vars("x${MNEMO_TEST_UNSET}y"), "xy");
    assert_eq!(expand_env_vars("cost: 5$ or $"), "cost: 5$ or $");
    assert_eq!(expand_env_vars("open ${NAME"), "open ${NAME");
  }

  #[test]
  fn test_defaults_when_sections_missing() {
    let config = MnemoConfig::from_yaml("{}").unwrap();
    assert_eq!(config, MnemoConfig::default());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.cache.feed_capacity, 1024);
  }

  #[test]
  fn test_parse_full_config() {
    let yaml = "
cache:
  feed_capacity: 16
  overflow: block
  history_limit: 100
logging:
  level: warn
";
    let config = MnemoConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.cache.feed_capacity, 16);
    assert_eq!(config.cache.overflow, OverflowPolicy::Block);
    assert_eq!(config.cache.history_limit, Some(100));
    assert_eq!(config.logging.level, "warn");
  }
}
