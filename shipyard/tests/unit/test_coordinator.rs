//! Coordinator server and client tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::oneshot;
use tower::ServiceExt;

use shipyard::config::{snapshot_of, SnapshotEntry};
use shipyard::coordinator::serve::{router, serve, ServerOptions};
use shipyard::coordinator::state::ServerState;
use shipyard::coordinator::{Coordinator, HttpCoordinator, Master};
use shipyard::errors::{RpcError, ShipyardError};
use shipyard::inventory::Host;
use shipyard::remote::LocalExecutor;
use shipyard::runtime::{FunctionRegistry, Runtime, RuntimeParts};

fn master() -> Arc<Master> {
    let mut functions = FunctionRegistry::new();
    functions.register("readK", |rt, _args| async move { rt.get("k").await });
    functions.register("explode", |_rt, _args| async move {
        Err(ShipyardError::DeployError("kaboom".to_string()))
    });

    let mut parts = RuntimeParts::new(Arc::new(LocalExecutor));
    parts.functions = Arc::new(functions);
    let hosts = vec![
        Arc::new(Host::new("h1").with_config("stage", json!("prod"))),
        Arc::new(Host::new("h2").with_config("k", json!("v"))),
    ];
    Arc::new(Master::new(Runtime::master(parts, &hosts)))
}

struct Running {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(master: Arc<Master>) -> Running {
    let (tx, rx) = oneshot::channel::<()>();
    let (addr, _handle) = serve(
        &ServerOptions::default(),
        Arc::new(ServerState::new(master)),
        async move {
            let _ = rx.await;
        },
    )
    .await
    .unwrap();
    Running {
        addr,
        shutdown: Some(tx),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_and_save_are_isolated_per_host() {
    let master = master();
    let server = start(master.clone()).await;
    let client = HttpCoordinator::new(server.addr, Duration::from_secs(5)).unwrap();

    let snapshot = client.load("h1").await.unwrap();
    assert_eq!(
        snapshot.get("stage").and_then(SnapshotEntry::value),
        Some(&json!("prod"))
    );

    client
        .save("h1", snapshot_of([("release_path", json!("/srv/app/releases/7"))]))
        .await
        .unwrap();

    assert_eq!(master.peek("h1", "release_path"), Some(json!("/srv/app/releases/7")));
    assert_eq!(master.peek("h2", "release_path"), None);
    let other = client.load("h2").await.unwrap();
    assert!(!other.contains_key("release_path"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_saves_stay_with_their_host() {
    let master = master();
    let server = start(master.clone()).await;
    let client = HttpCoordinator::new(server.addr, Duration::from_secs(5)).unwrap();

    let saves = (0..8).map(|i| {
        let host = if i % 2 == 0 { "h1" } else { "h2" };
        let key = format!("{}_key_{}", host, i);
        client.save(host, snapshot_of([(key, json!(i))]))
    });
    for result in join_all(saves).await {
        result.unwrap();
    }

    let h1 = client.load("h1").await.unwrap();
    for i in (0..8).step_by(2) {
        assert_eq!(
            h1.get(&format!("h1_key_{}", i)).and_then(SnapshotEntry::value),
            Some(&json!(i))
        );
    }
    assert!(!h1.keys().any(|k| k.starts_with("h2_")));

    let h2 = client.load("h2").await.unwrap();
    assert_eq!(h2.keys().filter(|k| k.starts_with("h2_key_")).count(), 4);
    assert!(!h2.keys().any(|k| k.starts_with("h1_")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_sees_saved_value() {
    let server = start(master()).await;
    let client = HttpCoordinator::new(server.addr, Duration::from_secs(5)).unwrap();

    client.save("h1", snapshot_of([("k", json!("v"))])).await.unwrap();
    assert_eq!(client.proxy("h1", "readK", vec![]).await.unwrap(), json!("v"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_runs_function_in_host_context() {
    let server = start(master()).await;
    let client = HttpCoordinator::new(server.addr, Duration::from_secs(5)).unwrap();

    let value = client.proxy("h2", "readK", vec![]).await.unwrap();
    assert_eq!(value, json!("v"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_proxy_errors() {
    let server = start(master()).await;
    let client = HttpCoordinator::new(server.addr, Duration::from_secs(5)).unwrap();

    match client.proxy("h1", "explode", vec![]).await {
        Err(ShipyardError::RpcError(RpcError::Remote { kind, message })) => {
            assert_eq!(kind, "deploy");
            assert!(message.contains("kaboom"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    match client.proxy("h1", "missing", vec![]).await {
        Err(ShipyardError::RpcError(RpcError::Status { status, body })) => {
            assert_eq!(status, 500);
            assert!(body.starts_with("Master error:"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    match client.load("nobody").await {
        Err(ShipyardError::RpcError(RpcError::Status { status, .. })) => assert_eq!(status, 500),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_raw_requests() {
    let server = start(master()).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("http://{}/proxy", server.addr))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 500);
    assert!(response.text().await.unwrap().starts_with("Master error:"));

    let response = http
        .get(format!("http://{}/elsewhere", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().await.unwrap(), "Server path not found: /elsewhere");
}

#[tokio::test]
async fn test_router_without_socket() {
    let app = router(Arc::new(ServerState::new(master())));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/load")
                .body(Body::from(r#"{"host":"h2"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_coordinator() {
    // bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpCoordinator::new(addr, Duration::from_secs(2)).unwrap();
    let result = client.load("h1").await;
    assert!(matches!(
        result,
        Err(ShipyardError::RpcError(RpcError::Transport(_))) | Err(ShipyardError::Timeout { .. })
    ));
}
