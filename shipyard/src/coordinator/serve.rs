//! Coordinator HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::post, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::coordinator::handlers::{load_handler, not_found_handler, proxy_handler, save_handler};
use crate::coordinator::protocol::{LOAD_PATH, PROXY_PATH, SAVE_PATH};
use crate::coordinator::state::ServerState;
use crate::errors::ShipyardError;

/// Coordinator server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,

    /// 0 picks a free port
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(LOAD_PATH, post(load_handler))
        .route(SAVE_PATH, post(save_handler))
        .route(PROXY_PATH, post(proxy_handler))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the coordinator server, returning the bound address
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), ShipyardError>>), ShipyardError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ShipyardError::ServerError(e.to_string()))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ShipyardError::ServerError(e.to_string()))?;
    info!("Coordinator listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ShipyardError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
