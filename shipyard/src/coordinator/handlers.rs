//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::coordinator::protocol::{LoadRequest, ProxyFailure, ProxyRequest, SaveRequest};
use crate::coordinator::state::ServerState;
use crate::errors::ShipyardError;

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, ShipyardError> {
    Ok(serde_json::from_slice(body)?)
}

fn master_error(err: ShipyardError) -> Response {
    error!("Master error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Master error: {}", err),
    )
        .into_response()
}

/// `POST /load {host}`
pub async fn load_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request: LoadRequest = match parse(&body) {
        Ok(request) => request,
        Err(e) => return master_error(e),
    };
    match state.master.load(&request.host).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => master_error(e),
    }
}

/// `POST /save {host, config}`
pub async fn save_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request: SaveRequest = match parse(&body) {
        Ok(request) => request,
        Err(e) => return master_error(e),
    };
    match state.master.save(&request.host, request.config).await {
        Ok(()) => Json(true).into_response(),
        Err(e) => master_error(e),
    }
}

/// `POST /proxy {host, func, arguments}`
pub async fn proxy_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request: ProxyRequest = match parse(&body) {
        Ok(request) => request,
        Err(e) => return master_error(e),
    };
    match state
        .master
        .proxy_checked(&request.host, &request.func, request.arguments)
        .await
    {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ProxyFailure::from(&e)),
        )
            .into_response(),
        Err(e) => master_error(e),
    }
}

/// Anything else
pub async fn not_found_handler(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Server path not found: {}", uri.path()),
    )
        .into_response()
}
