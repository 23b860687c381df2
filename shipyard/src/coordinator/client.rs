//! Worker side of the coordinator protocol over HTTP

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use crate::config::ConfigSnapshot;
use crate::coordinator::protocol::{
    LoadRequest, ProxyFailure, ProxyRequest, SaveRequest, LOAD_PATH, PROXY_PATH, SAVE_PATH,
};
use crate::coordinator::Coordinator;
use crate::errors::{RpcError, ShipyardError};

/// HTTP client for the master's coordinator server
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCoordinator {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Result<Self, ShipyardError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = Url::parse(&format!("http://{}", addr))
            .map_err(|e| ShipyardError::ConfigError(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ShipyardError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(path, e))?;

        let status = response.status();
        if status == StatusCode::OK {
            return response
                .json()
                .await
                .map_err(|e| self.transport_error(path, e));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            if let Ok(failure) = serde_json::from_str::<ProxyFailure>(&body) {
                return Err(RpcError::Remote {
                    kind: failure.error.kind,
                    message: failure.error.message,
                }
                .into());
            }
        }
        error!("Coordinator {} replied {}: {}", path, status, body);
        Err(RpcError::Status {
            status: status.as_u16(),
            body,
        }
        .into())
    }

    fn transport_error(&self, path: &str, err: reqwest::Error) -> ShipyardError {
        if err.is_timeout() {
            ShipyardError::Timeout {
                after: self.timeout,
                what: format!("coordinator call {}", path),
            }
        } else {
            RpcError::Transport(err.to_string()).into()
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn load(&self, host: &str) -> Result<ConfigSnapshot, ShipyardError> {
        let request = LoadRequest {
            host: host.to_string(),
        };
        self.post(LOAD_PATH, &request).await
    }

    async fn save(&self, host: &str, config: ConfigSnapshot) -> Result<(), ShipyardError> {
        let request = SaveRequest {
            host: host.to_string(),
            config,
        };
        let _: Value = self.post(SAVE_PATH, &request).await?;
        Ok(())
    }

    async fn proxy(&self, host: &str, func: &str, arguments: Vec<Value>) -> Result<Value, ShipyardError> {
        let request = ProxyRequest {
            host: host.to_string(),
            func: func.to_string(),
            arguments,
        };
        self.post(PROXY_PATH, &request).await
    }
}
