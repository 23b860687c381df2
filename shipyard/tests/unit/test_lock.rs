//! Deploy lock tests against a local host

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use shipyard::deploy::lock::LockManager;
use shipyard::errors::ShipyardError;
use shipyard::inventory::Host;
use shipyard::remote::LocalExecutor;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use crate::support::StallingExecutor;

fn setup() -> (TempDir, Host, LockManager, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".dep/deploy.lock").display().to_string();
    (dir, Host::local("local"), LockManager::new(Arc::new(LocalExecutor)), path)
}

#[tokio::test]
async fn test_acquire_then_held() {
    let (_dir, host, locks, path) = setup();

    let handle = locks.acquire(&host, &path, "alice@laptop").await.unwrap();
    assert_eq!(handle.record.owner, "alice@laptop");
    assert_eq!(handle.path, path);

    match locks.acquire(&host, &path, "bob@desktop").await {
        Err(ShipyardError::LockHeld { owner, acquired_at }) => {
            assert_eq!(owner, "alice@laptop");
            assert_eq!(acquired_at, handle.record.acquired_at.to_rfc3339());
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let holder = locks.inspect(&host, &path).await.unwrap();
    assert_eq!(holder, Some(handle.record));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_acquire_has_one_winner() {
    let (_dir, host, locks, path) = setup();

    let attempts = (0..8).map(|i| {
        let owner = format!("user{}@ci", i);
        let host = &host;
        let locks = &locks;
        let path = &path;
        async move { locks.acquire(host, path, &owner).await }
    });
    let results = join_all(attempts).await;

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        match result {
            Err(ShipyardError::LockHeld { owner, .. }) => assert_eq!(owner, &winners[0].record.owner),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_release_then_reacquire() {
    let (_dir, host, locks, path) = setup();

    let first = assert_ok!(locks.acquire(&host, &path, "alice@laptop").await);
    assert_ok!(locks.release(&host, &first).await);
    assert_eq!(locks.inspect(&host, &path).await.unwrap(), None);

    let second = locks.acquire(&host, &path, "bob@desktop").await.unwrap();
    assert_ne!(first.record.token, second.record.token);

    // releasing twice only warns
    assert_ok!(locks.release(&host, &second).await);
    assert_ok!(locks.release(&host, &second).await);
}

#[tokio::test]
async fn test_release_refuses_foreign_lock() {
    let (_dir, host, locks, path) = setup();

    let stale = locks.acquire(&host, &path, "alice@laptop").await.unwrap();
    let removed = locks.force_release(&host, &path).await.unwrap();
    assert_eq!(removed.map(|r| r.owner), Some("alice@laptop".to_string()));

    let current = locks.acquire(&host, &path, "bob@desktop").await.unwrap();
    let result = assert_err!(locks.release(&host, &stale).await);
    assert!(matches!(result, ShipyardError::LockMismatch { .. }));

    let holder = locks.inspect(&host, &path).await.unwrap();
    assert_eq!(holder, Some(current.record));
}

#[tokio::test]
async fn test_force_release_without_lock() {
    let (_dir, host, locks, path) = setup();
    assert_eq!(locks.force_release(&host, &path).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreadable_lock_reports_unknown_owner() {
    let (dir, host, locks, path) = setup();
    std::fs::create_dir_all(dir.path().join(".dep")).unwrap();
    std::fs::write(&path, "garbage").unwrap();

    match locks.acquire(&host, &path, "alice@laptop").await {
        Err(ShipyardError::LockHeld { owner, .. }) => assert_eq!(owner, "unknown"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_acquire_leaves_nothing_behind() {
    let (dir, host, plain, path) = setup();

    // the lock gets created but the reply never arrives in time
    let stalling = Arc::new(StallingExecutor::after("ln ", Duration::from_secs(2)));
    let locks = LockManager::new(stalling).with_timeout(Some(Duration::from_millis(500)));

    let started = Instant::now();
    let error = assert_err!(locks.acquire(&host, &path, "alice@laptop").await);
    assert!(matches!(error, ShipyardError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(!Path::new(&path).exists());
    let leftovers = std::fs::read_dir(dir.path().join(".dep")).unwrap().count();
    assert_eq!(leftovers, 0);
    assert_ok!(plain.acquire(&host, &path, "bob@desktop").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_acquire_keeps_foreign_lock() {
    let (_dir, host, plain, path) = setup();
    let held = assert_ok!(plain.acquire(&host, &path, "bob@desktop").await);

    let stalling = Arc::new(StallingExecutor::after("ln ", Duration::from_secs(2)));
    let locks = LockManager::new(stalling).with_timeout(Some(Duration::from_millis(500)));
    let error = assert_err!(locks.acquire(&host, &path, "alice@laptop").await);
    assert!(matches!(error, ShipyardError::Timeout { .. }));

    assert_eq!(plain.inspect(&host, &path).await.unwrap(), Some(held.record));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_release_honors_timeout() {
    let (_dir, host, plain, path) = setup();
    let handle = assert_ok!(plain.acquire(&host, &path, "alice@laptop").await);

    let stalling = Arc::new(StallingExecutor::before("grep -qF", Duration::from_secs(3)));
    let locks = LockManager::new(stalling).with_timeout(Some(Duration::from_millis(200)));

    let started = Instant::now();
    let error = assert_err!(locks.release(&host, &handle).await);
    assert!(matches!(error, ShipyardError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}
