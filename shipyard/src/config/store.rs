//! Per-host config store layered over global defaults

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::config::value::{Config, ConfigSnapshot, ConfigValue, DeferredFn};
use crate::errors::ShipyardError;

/// Result of looking a key up without evaluating it
#[derive(Clone)]
pub enum Lookup {
    /// Value available now (plain or memoized)
    Ready(Value),

    /// Deferred computation that still has to run
    Pending(Arc<DeferredFn>),
}

/// Host configs owned by one execution unit.
///
/// The master's store is authoritative. A worker's store is a local view seeded
/// from a coordinator snapshot.
pub struct ConfigStore {
    defaults: Arc<Config>,
    hosts: RwLock<HashMap<String, Config>>,
}

impl ConfigStore {
    /// Create a store with the given global defaults and no hosts
    pub fn new(defaults: Arc<Config>) -> Self {
        Self {
            defaults,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Register a host with its declared config
    pub fn insert_host(&self, alias: &str, config: Config) {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        hosts.insert(alias.to_string(), config);
    }

    /// Look a key up for a host: its own entries first, then the defaults
    pub fn lookup(&self, alias: &str, key: &str) -> Result<Option<Lookup>, ShipyardError> {
        let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
        let config = hosts
            .get(alias)
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))?;

        if let Some(entry) = config.entry(key) {
            return Ok(Some(to_lookup(entry)));
        }
        Ok(self.defaults.entry(key).map(to_lookup))
    }

    /// Look a key up in the defaults only (no host in context)
    pub fn lookup_default(&self, key: &str) -> Option<Lookup> {
        self.defaults.entry(key).map(to_lookup)
    }

    /// Whether the key is declared for the host or globally
    pub fn has(&self, alias: Option<&str>, key: &str) -> bool {
        if let Some(alias) = alias {
            let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
            if hosts.get(alias).is_some_and(|c| c.contains(key)) {
                return true;
            }
        }
        self.defaults.contains(key)
    }

    pub fn set(&self, alias: &str, key: &str, value: ConfigValue) -> Result<(), ShipyardError> {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        let config = hosts
            .get_mut(alias)
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))?;
        config.set(key, value)
    }

    /// Overwrite a key regardless of memoization
    pub fn put(&self, alias: &str, key: &str, value: Value) -> Result<(), ShipyardError> {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        let config = hosts
            .get_mut(alias)
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))?;
        config.put(key, value);
        Ok(())
    }

    pub fn memoize(&self, alias: &str, key: &str, value: Value) {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        if let Some(config) = hosts.get_mut(alias) {
            config.memoize(key, value);
        }
    }

    pub fn invalidate(&self, alias: &str, key: &str) -> bool {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        hosts
            .get_mut(alias)
            .map(|config| config.invalidate(key))
            .unwrap_or(false)
    }

    /// Snapshot of a host's own entries
    pub fn snapshot(&self, alias: &str) -> Result<ConfigSnapshot, ShipyardError> {
        let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
        hosts
            .get(alias)
            .map(Config::snapshot)
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))
    }

    /// Merge a snapshot into a host's entries, overwriting existing keys
    pub fn merge(&self, alias: &str, snapshot: ConfigSnapshot) -> Result<(), ShipyardError> {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        let config = hosts
            .get_mut(alias)
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))?;
        config.merge(snapshot);
        Ok(())
    }

    /// Plain or memoized value of a host's own key, without evaluating anything
    pub fn peek(&self, alias: &str, key: &str) -> Option<Value> {
        let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
        match hosts.get(alias)?.entry(key)? {
            ConfigValue::Value(v) | ConfigValue::Resolved(v) => Some(v.clone()),
            ConfigValue::Deferred(_) => None,
        }
    }
}

fn to_lookup(entry: &ConfigValue) -> Lookup {
    match entry {
        ConfigValue::Value(v) | ConfigValue::Resolved(v) => Lookup::Ready(v.clone()),
        ConfigValue::Deferred(f) => Lookup::Pending(f.clone()),
    }
}
