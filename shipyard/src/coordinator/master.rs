//! The master: authoritative host configs behind a single request gate

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::ConfigSnapshot;
use crate::coordinator::Coordinator;
use crate::errors::{RpcError, ShipyardError};
use crate::runtime::Runtime;

/// Config key under which a host's failure is recorded
pub const FAILURE_KEY: &str = "failure";

/// Owns the master runtime. Requests are served one at a time, in arrival order.
pub struct Master {
    runtime: Runtime,
    gate: Mutex<()>,
}

impl Master {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            gate: Mutex::new(()),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Hold the gate, e.g. while a shallow task runs in the master
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub async fn load(&self, host: &str) -> Result<ConfigSnapshot, ShipyardError> {
        let _gate = self.gate.lock().await;
        debug!("load {}", host);
        self.runtime.snapshot(host)
    }

    pub async fn save(&self, host: &str, config: ConfigSnapshot) -> Result<(), ShipyardError> {
        let _gate = self.gate.lock().await;
        debug!("save {} ({} keys)", host, config.len());
        self.runtime.merge(host, config)
    }

    /// Validate and run a proxied call.
    ///
    /// The outer error covers requests that can't be served (unknown host or
    /// function); the inner result is what the function itself returned.
    pub async fn proxy_checked(
        &self,
        host: &str,
        func: &str,
        arguments: Vec<Value>,
    ) -> Result<Result<Value, ShipyardError>, ShipyardError> {
        let _gate = self.gate.lock().await;
        self.runtime.functions().get(func)?;
        self.runtime.host(host)?;
        debug!("proxy {}({}) on {}", func, arguments.len(), host);
        let result = self.runtime.invoke(host, func, arguments).await;
        if let Err(e) = &result {
            warn!("Proxied `{}` failed on {}: {}", func, host, e);
        }
        Ok(result)
    }

    /// Record why a host failed so hooks and the report can see it
    pub async fn record_failure(&self, host: &str, task: &str, reason: &str) {
        let _gate = self.gate.lock().await;
        let failure = json!({ "task": task, "reason": reason });
        if let Err(e) = self.runtime.put(host, FAILURE_KEY, failure) {
            warn!("Failed to record failure for {}: {}", host, e);
        }
    }

    pub fn peek(&self, host: &str, key: &str) -> Option<Value> {
        self.runtime.peek(host, key)
    }
}

#[async_trait]
impl Coordinator for Master {
    async fn load(&self, host: &str) -> Result<ConfigSnapshot, ShipyardError> {
        Master::load(self, host).await.map_err(master_error)
    }

    async fn save(&self, host: &str, config: ConfigSnapshot) -> Result<(), ShipyardError> {
        Master::save(self, host, config).await.map_err(master_error)
    }

    async fn proxy(&self, host: &str, func: &str, arguments: Vec<Value>) -> Result<Value, ShipyardError> {
        match self.proxy_checked(host, func, arguments).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RpcError::Remote {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }
            .into()),
            Err(e) => Err(master_error(e)),
        }
    }
}

// same shape a worker gets over HTTP
fn master_error(err: ShipyardError) -> ShipyardError {
    RpcError::Status {
        status: 500,
        body: format!("Master error: {}", err),
    }
    .into()
}
