//! Named zero-argument commands attached to a store

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::RegistryError;

/// A registered command.
pub type Command = Arc<dyn Fn() + Send + Sync>;

/// Dispatch table of named commands.
#[derive(Default)]
pub struct Commands {
  list: RwLock<HashMap<String, Command>>,
}

impl Commands {
  pub fn new() -> Self {
    Self::default()
  }

  /// Merge commands into the table, replacing any with the same name.
  pub fn assign<I, S, F>(&self, commands: I)
  where
    I: IntoIterator<Item = (S, F)>,
    S: Into<String>,
    F: Fn() + Send + Sync + 'static,
  {
    let mut list = self.list.write();
    for (name, f) in commands {
      list.insert(name.into(), Arc::new(f));
    }
  }

  pub fn register<F>(&self, name: impl Into<String>, f: F)
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.list.write().insert(name.into(), Arc::new(f));
  }

  /// Run a command by name. The command runs without the table locked, so
  /// it may itself register or execute commands.
  pub fn execute(&self, name: &str) -> Result<(), RegistryError> {
    let command = self
      .list
      .read()
      .get(name)
      .cloned()
      .ok_or_else(|| RegistryError::NoCommand(name.to_string()))?;
    command();
    Ok(())
  }

  pub fn remove(&self, name: &str) -> bool {
    self.list.write().remove(name).is_some()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.list.read().contains_key(name)
  }

  /// Command names, sorted.
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<_> = self.list.read().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.list.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.list.read().is_empty()
  }
}
