//! Coordinator wire messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigSnapshot;
use crate::errors::ShipyardError;

pub const LOAD_PATH: &str = "/load";
pub const SAVE_PATH: &str = "/save";
pub const PROXY_PATH: &str = "/proxy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub host: String,
    pub config: ConfigSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub host: String,
    pub func: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Body of a 422 reply: the proxied function ran and failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyFailure {
    pub error: FailureDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: String,
    pub message: String,
}

impl From<&ShipyardError> for ProxyFailure {
    fn from(err: &ShipyardError) -> Self {
        Self {
            error: FailureDetail {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}
