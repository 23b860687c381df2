//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::context::Input;
use crate::inventory::Settings;
use crate::task::SchedulerOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Task or group to run
    pub pipeline: String,

    /// Inventory file
    pub inventory: PathBuf,

    /// Host aliases to run on; empty means all
    pub hosts: Vec<String>,

    /// Only hosts carrying this `key=value` label
    pub label: Option<(String, String)>,

    /// Options handed to tasks
    pub input: Input,

    /// Colored output
    pub decorated: bool,

    /// Scheduler configuration
    pub scheduler: SchedulerOptions,

    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            pipeline: "deploy".to_string(),
            inventory: PathBuf::from("inventory.json"),
            hosts: Vec::new(),
            label: None,
            input: Input::new(),
            decorated: true,
            scheduler: SchedulerOptions::default(),
            lifecycle: LifecycleOptions::default(),
        }
    }
}

impl AppOptions {
    /// Options with the scheduler limits taken from the inventory settings
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            scheduler: SchedulerOptions {
                max_concurrency: settings.max_concurrency,
                default_timeout: match settings.default_timeout_secs {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
                rpc_timeout: Duration::from_secs(settings.rpc_timeout_secs.max(1)),
                ..defaults.scheduler
            },
            ..defaults
        }
    }
}

/// Lifecycle options for a run
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long the failure path may take after an abort before the process exits
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(60),
        }
    }
}
