//! Error types for shipyard

use std::time::Duration;

use thiserror::Error;

/// Main error type for shipyard
#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Deploy is locked by {owner} since {acquired_at}")]
    LockHeld { owner: String, acquired_at: String },

    #[error("Lock at {path} is held by another deploy, refusing to remove it")]
    LockMismatch { path: String },

    #[error("Command `{command}` failed on {host} (exit code {}): {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    RemoteError {
        host: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timed out after {after:?}: {what}")]
    Timeout { after: Duration, what: String },

    #[error("RPC error: {0}")]
    RpcError(#[from] RpcError),

    #[error("Dependency cycle detected: {}", chain.join(" -> "))]
    CycleError { chain: Vec<String> },

    #[error("Task `{0}` not found")]
    UnknownTask(String),

    #[error("Function `{0}` is not registered")]
    UnknownFunction(String),

    #[error("Host `{0}` not found")]
    UnknownHost(String),

    #[error("Context stack is empty")]
    EmptyContextStack,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Run aborted")]
    Aborted,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShipyardError {
    /// Stable tag used when the error crosses the coordinator boundary
    pub fn kind(&self) -> &'static str {
        match self {
            ShipyardError::IoError(_) => "io",
            ShipyardError::JsonError(_) => "json",
            ShipyardError::HttpError(_) => "http",
            ShipyardError::ConfigError(_) => "configuration",
            ShipyardError::LockHeld { .. } => "lock_held",
            ShipyardError::LockMismatch { .. } => "lock_mismatch",
            ShipyardError::RemoteError { .. } => "remote_execution",
            ShipyardError::Timeout { .. } => "timeout",
            ShipyardError::RpcError(_) => "rpc",
            ShipyardError::CycleError { .. } => "cycle",
            ShipyardError::UnknownTask(_) => "unknown_task",
            ShipyardError::UnknownFunction(_) => "unknown_function",
            ShipyardError::UnknownHost(_) => "unknown_host",
            ShipyardError::EmptyContextStack => "empty_context_stack",
            ShipyardError::InvalidTransition(_) => "invalid_transition",
            ShipyardError::DeployError(_) => "deploy",
            ShipyardError::Aborted => "aborted",
            ShipyardError::ServerError(_) => "server",
            ShipyardError::Internal(_) => "internal",
        }
    }

    /// Errors detected before any host starts; these abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShipyardError::ConfigError(_)
                | ShipyardError::CycleError { .. }
                | ShipyardError::UnknownTask(_)
        )
    }
}

/// Failures talking to the coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("coordinator replied {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },
}
