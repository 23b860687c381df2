//! Per-host outcome of a run

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    Succeeded,
    Failed { task: String, reason: String },
    RolledBack,
}

impl HostOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, HostOutcome::Failed { .. })
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOutcome::Succeeded => write!(f, "succeeded"),
            HostOutcome::Failed { task, reason } => write!(f, "failed in {}: {}", task, reason),
            HostOutcome::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    pub hosts: BTreeMap<String, HostOutcome>,
}

impl RunReport {
    /// False as soon as one host failed
    pub fn is_success(&self) -> bool {
        !self.hosts.values().any(HostOutcome::is_failed)
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(alias, _)| alias.as_str())
            .collect()
    }

    pub fn outcome(&self, alias: &str) -> Option<&HostOutcome> {
        self.hosts.get(alias)
    }
}
