//! Host inventory

pub mod host;
pub mod settings;

use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::ShipyardError;

pub use host::Host;
pub use settings::{HostSettings, Settings};

/// All hosts declared for a run, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Arc<Host>>,
}

impl Inventory {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.hosts.iter().cloned().map(Host::from).collect())
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn get(&self, alias: &str) -> Option<&Arc<Host>> {
        self.hosts.iter().find(|h| h.alias == alias)
    }

    /// Pick hosts by alias, each at most once, in the order first given.
    /// An empty selection means every host.
    pub fn select(&self, aliases: &[String]) -> Result<Vec<Arc<Host>>, ShipyardError> {
        if aliases.is_empty() {
            return Ok(self.hosts.clone());
        }
        let mut seen = HashSet::new();
        aliases
            .iter()
            .filter(|alias| seen.insert(alias.as_str()))
            .map(|alias| {
                self.get(alias)
                    .cloned()
                    .ok_or_else(|| ShipyardError::UnknownHost(alias.clone()))
            })
            .collect()
    }

    /// Hosts carrying `key=value` among their labels
    pub fn with_label(&self, key: &str, value: &str) -> Vec<Arc<Host>> {
        self.hosts
            .iter()
            .filter(|h| h.labels.get(key).map(String::as_str) == Some(value))
            .cloned()
            .collect()
    }
}
