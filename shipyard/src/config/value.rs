//! Config entries and host config maps

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ShipyardError;
use crate::runtime::Runtime;

/// A lazily evaluated config value, computed in the context of the host being resolved
pub type DeferredFn =
    dyn Fn(Runtime) -> BoxFuture<'static, Result<Value, ShipyardError>> + Send + Sync;

/// One config entry
#[derive(Clone)]
pub enum ConfigValue {
    /// Plain value, set directly
    Value(Value),

    /// Computation evaluated on first read
    Deferred(Arc<DeferredFn>),

    /// Memoized result of a deferred computation
    Resolved(Value),
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ConfigValue::Deferred(_) => f.write_str("Deferred(..)"),
            ConfigValue::Resolved(v) => f.debug_tuple("Resolved").field(v).finish(),
        }
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        ConfigValue::Value(value)
    }
}

/// Build a deferred config value from an async closure
pub fn deferred<F, Fut>(f: F) -> ConfigValue
where
    F: Fn(Runtime) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ShipyardError>> + Send + 'static,
{
    ConfigValue::Deferred(Arc::new(move |rt| Box::pin(f(rt))))
}

/// Key/value config for one host (or the global defaults)
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: HashMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, without evaluation
    pub fn entry(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Set an entry. Fails once the key has been memoized.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<(), ShipyardError> {
        if let Some(ConfigValue::Resolved(_)) = self.entries.get(key) {
            return Err(ShipyardError::ConfigError(format!(
                "Config option `{}` was already resolved for this run and can't be changed; invalidate it first",
                key
            )));
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Store the result of a deferred computation
    pub fn memoize(&mut self, key: &str, value: Value) {
        self.entries
            .insert(key.to_string(), ConfigValue::Resolved(value));
    }

    /// Drop a memoized or plain value. Returns whether anything was removed.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Overwrite a key with a plain value, ignoring memoization
    pub fn put(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), ConfigValue::Value(value));
    }

    /// Serializable view of every entry
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.entries
            .iter()
            .map(|(key, value)| {
                let entry = match value {
                    ConfigValue::Value(v) => SnapshotEntry::Value { value: v.clone() },
                    ConfigValue::Resolved(v) => SnapshotEntry::Resolved { value: v.clone() },
                    ConfigValue::Deferred(_) => SnapshotEntry::Deferred,
                };
                (key.clone(), entry)
            })
            .collect()
    }

    /// Merge a snapshot, overwriting existing keys.
    ///
    /// Deferred placeholders are skipped so the receiver keeps its own declaration.
    pub fn merge(&mut self, snapshot: ConfigSnapshot) {
        for (key, entry) in snapshot {
            match entry {
                SnapshotEntry::Value { value } => {
                    self.entries.insert(key, ConfigValue::Value(value));
                }
                SnapshotEntry::Resolved { value } => {
                    self.entries.insert(key, ConfigValue::Resolved(value));
                }
                SnapshotEntry::Deferred => {}
            }
        }
    }
}

impl From<serde_json::Map<String, Value>> for Config {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, ConfigValue::Value(v)))
                .collect(),
        }
    }
}

/// Snapshot entry as it travels between master and workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SnapshotEntry {
    /// Final plain value
    Value { value: Value },

    /// Memoized result of a deferred value
    Resolved { value: Value },

    /// Placeholder; the receiver resolves it from its own declaration
    Deferred,
}

impl SnapshotEntry {
    pub fn value(&self) -> Option<&Value> {
        match self {
            SnapshotEntry::Value { value } | SnapshotEntry::Resolved { value } => Some(value),
            SnapshotEntry::Deferred => None,
        }
    }
}

/// Host config snapshot keyed by option name
pub type ConfigSnapshot = BTreeMap<String, SnapshotEntry>;

/// Build a snapshot of plain values, the shape workers send on save
pub fn snapshot_of<I, K>(values: I) -> ConfigSnapshot
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    values
        .into_iter()
        .map(|(k, value)| (k.into(), SnapshotEntry::Value { value }))
        .collect()
}
