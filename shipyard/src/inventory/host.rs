//! Deploy target

use std::collections::BTreeMap;

use crate::config::Config;
use crate::inventory::settings::HostSettings;

/// One deployment target with its connection parameters and declared config
#[derive(Debug, Clone)]
pub struct Host {
    pub alias: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub remote_user: Option<String>,
    pub identity_file: Option<String>,
    pub ssh_arguments: Vec<String>,
    pub local: bool,
    pub labels: BTreeMap<String, String>,
    pub config: Config,
}

impl Host {
    /// Remote host reachable under its alias
    pub fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            hostname: alias.to_string(),
            port: None,
            remote_user: None,
            identity_file: None,
            ssh_arguments: Vec::new(),
            local: false,
            labels: BTreeMap::new(),
            config: Config::new(),
        }
    }

    /// Host whose commands run on this machine
    pub fn local(alias: &str) -> Self {
        Self {
            hostname: "localhost".to_string(),
            local: true,
            ..Self::new(alias)
        }
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.put(key, value);
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// `user@hostname` (or just the hostname) as given to ssh
    pub fn connection_string(&self) -> String {
        match &self.remote_user {
            Some(user) => format!("{}@{}", user, self.hostname),
            None => self.hostname.clone(),
        }
    }
}

impl From<HostSettings> for Host {
    fn from(settings: HostSettings) -> Self {
        let hostname = settings
            .hostname
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| settings.alias.clone());
        Self {
            alias: settings.alias,
            hostname,
            port: settings.port,
            remote_user: settings.remote_user,
            identity_file: settings.identity_file,
            ssh_arguments: settings.ssh_arguments,
            local: settings.local,
            labels: settings.labels,
            config: Config::from(settings.config),
        }
    }
}
