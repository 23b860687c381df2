//! Inventory settings file

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ShipyardError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Contents of the inventory file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stderr
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Maximum number of hosts worked on at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for a single remote command, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Timeout for a single coordinator call, in seconds
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Global config entries layered under every host
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Deploy targets
    #[serde(default)]
    pub hosts: Vec<HostSettings>,
}

fn default_max_concurrency() -> usize {
    16
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_rpc_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_json: false,
            log_dir: None,
            max_concurrency: default_max_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            config: Map::new(),
            hosts: Vec::new(),
        }
    }
}

impl Settings {
    /// Read and validate an inventory file
    pub async fn load(file: &File) -> Result<Self, ShipyardError> {
        if !file.exists().await {
            return Err(ShipyardError::ConfigError(format!(
                "Inventory file {} does not exist",
                file.path().display()
            )));
        }
        let settings: Settings = file.read_json().await.map_err(|e| {
            ShipyardError::ConfigError(format!(
                "Failed to parse inventory {}: {}",
                file.path().display(),
                e
            ))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ShipyardError> {
        if self.max_concurrency == 0 {
            return Err(ShipyardError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for host in &self.hosts {
            if host.alias.trim().is_empty() {
                return Err(ShipyardError::ConfigError(
                    "Host alias must not be empty".to_string(),
                ));
            }
            if !seen.insert(host.alias.as_str()) {
                return Err(ShipyardError::ConfigError(format!(
                    "Host `{}` is declared twice",
                    host.alias
                )));
            }
        }
        Ok(())
    }
}

/// One host entry of the inventory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSettings {
    pub alias: String,

    /// Address to connect to; defaults to the alias
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub remote_user: Option<String>,

    #[serde(default)]
    pub identity_file: Option<String>,

    /// Extra arguments appended to every ssh invocation
    #[serde(default)]
    pub ssh_arguments: Vec<String>,

    /// Run commands on this machine instead of over ssh
    #[serde(default)]
    pub local: bool,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Host specific config entries
    #[serde(default)]
    pub config: Map<String, Value>,
}
