//! Master side coordination: config load/save and cross-host function calls

pub mod client;
pub mod handlers;
pub mod master;
pub mod protocol;
pub mod serve;
pub mod state;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConfigSnapshot;
use crate::errors::ShipyardError;

pub use client::HttpCoordinator;
pub use master::Master;

/// What a worker unit can ask of the master
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Authoritative config snapshot of a host
    async fn load(&self, host: &str) -> Result<ConfigSnapshot, ShipyardError>;

    /// Merge a worker's config back into the master
    async fn save(&self, host: &str, config: ConfigSnapshot) -> Result<(), ShipyardError>;

    /// Run a registered function in the master with `host` as the current context
    async fn proxy(&self, host: &str, func: &str, arguments: Vec<Value>) -> Result<Value, ShipyardError>;
}
