//! Full release lifecycle against a local host

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use shipyard::context::{Input, Output};
use shipyard::deploy::fsm::{ReleaseEvent, ReleaseFsm, ReleaseState};
use shipyard::deploy::lock::LockManager;
use shipyard::deploy::recipe::common;
use shipyard::deploy::release::BAD_RELEASE_MARKER;
use shipyard::errors::ShipyardError;
use shipyard::inventory::Host;
use shipyard::remote::{LocalExecutor, RemoteExecutor};
use shipyard::task::{HostOutcome, Recipe, RunReport, Scheduler, SchedulerOptions};
use tempfile::TempDir;

use crate::support::StallingExecutor;

/// Common recipe with code checkout replaced by a local stub
fn offline_recipe() -> Recipe {
    let mut recipe = common().unwrap();
    recipe.task("deploy:update_code", |rt| async move {
        ReleaseFsm::step(&rt, ReleaseEvent::UpdateCode, async {
            rt.run("mkdir -p {{release_path}}/public && echo {{target}} > {{release_path}}/REVISION")
                .await?;
            Ok(())
        })
        .await
    });
    recipe
}

fn host(dir: &TempDir) -> Arc<Host> {
    named_host("local", dir)
}

fn named_host(alias: &str, dir: &TempDir) -> Arc<Host> {
    Arc::new(
        Host::local(alias)
            .with_config("deploy_path", json!(dir.path().display().to_string()))
            .with_config("keep_releases", json!(2))
            .with_config("shared_dirs", json!(["storage"]))
            .with_config("shared_files", json!([".env"]))
            .with_config("writable_dirs", json!(["cache"])),
    )
}

async fn run(recipe: Recipe, pipeline: &str, host: &Arc<Host>, input: Input) -> (RunReport, Output) {
    let scheduler = Scheduler::new(recipe, Arc::new(LocalExecutor), SchedulerOptions::default());
    run_on(scheduler, pipeline, &[host.clone()], input).await
}

async fn run_on(scheduler: Scheduler, pipeline: &str, hosts: &[Arc<Host>], input: Input) -> (RunReport, Output) {
    let output = Output::capture();
    let scheduler = scheduler.with_input(input).with_output(output.clone());
    let report = scheduler.run(pipeline, hosts).await.unwrap();
    (report, output)
}

fn current_release(dir: &TempDir) -> String {
    let target = std::fs::read_link(dir.path().join("current")).unwrap();
    target.file_name().unwrap().to_string_lossy().to_string()
}

fn releases(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("releases"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn lock_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join(".dep/deploy.lock")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deploy_publishes_release() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);

    let (report, output) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    assert!(report.is_success(), "{:?}", report);
    assert!(output.captured().iter().any(|l| l.contains("successfully deployed!")));

    assert_eq!(current_release(&dir), "1");
    let release = dir.path().join("releases/1");
    assert_eq!(std::fs::read_to_string(release.join("REVISION")).unwrap().trim(), "HEAD");
    assert!(std::fs::symlink_metadata(release.join("storage")).unwrap().file_type().is_symlink());
    assert!(std::fs::symlink_metadata(release.join(".env")).unwrap().file_type().is_symlink());
    assert!(dir.path().join("shared/storage").is_dir());
    assert!(release.join("cache").is_dir());
    assert!(!lock_path(&dir).exists());

    let latest = std::fs::read_to_string(dir.path().join(".dep/latest_release")).unwrap();
    assert_eq!(latest.trim(), "1");
    let log = std::fs::read_to_string(dir.path().join(".dep/releases_log")).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("\"release_name\":\"1\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_deploys_cleanup_and_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);

    let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    assert!(report.is_success());

    // `current` must resolve at every instant while later releases go live
    let current = dir.path().join("current");
    let stop = Arc::new(AtomicBool::new(false));
    let misses = Arc::new(AtomicUsize::new(0));
    let observer = {
        let stop = stop.clone();
        let misses = misses.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if std::fs::metadata(&current).is_err() {
                    misses.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
    };
    for _ in 0..2 {
        let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
        assert!(report.is_success(), "{:?}", report);
    }
    stop.store(true, Ordering::SeqCst);
    observer.join().unwrap();
    assert_eq!(misses.load(Ordering::SeqCst), 0);

    // keep_releases = 2
    assert_eq!(current_release(&dir), "3");
    assert_eq!(releases(&dir), vec!["2", "3"]);

    let (report, _) = run(offline_recipe(), "rollback", &host, Input::new()).await;
    assert_eq!(report.outcome("local"), Some(&HostOutcome::RolledBack));
    assert_eq!(current_release(&dir), "2");
    assert!(dir.path().join("releases/3").join(BAD_RELEASE_MARKER).exists());
    assert!(!lock_path(&dir).exists());

    let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    assert!(report.is_success());
    assert_eq!(current_release(&dir), "4");
    // 2 is the rollback target now that 3 is marked bad
    assert_eq!(releases(&dir), vec!["2", "3", "4"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_deploy_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);

    // no `repository` configured, so checkout fails
    let (report, output) = run(common().unwrap(), "deploy", &host, Input::new()).await;

    match report.outcome("local") {
        Some(HostOutcome::Failed { task, reason }) => {
            assert_eq!(task, "deploy:update_code");
            assert!(reason.contains("repository"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!lock_path(&dir).exists());
    assert!(!Path::new(&dir.path().join("current")).exists());
    assert!(output.captured().iter().any(|l| l.contains("deploy failed")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_held_lock_blocks_deploy_until_forced() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);
    let lock = lock_path(&dir).display().to_string();

    let locks = LockManager::new(Arc::new(LocalExecutor));
    locks.acquire(&host, &lock, "someone@elsewhere").await.unwrap();

    let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    match report.outcome("local") {
        Some(HostOutcome::Failed { task, reason }) => {
            assert_eq!(task, "deploy:lock");
            assert!(reason.contains("someone@elsewhere"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // the failure hook leaves a lock it doesn't own alone
    let holder = locks.inspect(&host, &lock).await.unwrap().unwrap();
    assert_eq!(holder.owner, "someone@elsewhere");

    let force = Input::new().with_option("force-unlock", "true");
    let (report, _) = run(offline_recipe(), "deploy:unlock", &host, force).await;
    assert!(report.is_success());
    assert!(!lock_path(&dir).exists());

    let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    assert!(report.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_setup_refuses_directory_at_current() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);
    std::fs::create_dir_all(dir.path().join("current")).unwrap();

    let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
    match report.outcome("local") {
        Some(HostOutcome::Failed { task, reason }) => {
            assert_eq!(task, "deploy:setup");
            assert!(reason.contains("not a symlink"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deploy_to_two_hosts_with_one_failing() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    let hosts = vec![named_host("h1", &dir1), named_host("h2", &dir2)];

    let mut recipe = offline_recipe();
    recipe.task("deploy:update_code", |rt| async move {
        ReleaseFsm::step(&rt, ReleaseEvent::UpdateCode, async {
            if rt.current_host()?.alias == "h2" {
                return Err(ShipyardError::DeployError("checkout failed".to_string()));
            }
            rt.run("mkdir -p {{release_path}} && echo {{target}} > {{release_path}}/REVISION")
                .await?;
            Ok(())
        })
        .await
    });
    let states: Arc<Mutex<Vec<(String, ReleaseState)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let states = states.clone();
        recipe.task("inspect", move |rt| {
            let states = states.clone();
            async move {
                let state = ReleaseFsm::load(&rt).await?.state();
                let alias = rt.current_host()?.alias.clone();
                states.lock().unwrap().push((alias, state));
                Ok(())
            }
        });
    }
    recipe.tasks.after("deploy", "inspect").unwrap();

    let scheduler = Scheduler::new(recipe, Arc::new(LocalExecutor), SchedulerOptions::default());
    let (report, output) = run_on(scheduler, "deploy", &hosts, Input::new()).await;

    assert_eq!(report.outcome("h1"), Some(&HostOutcome::Succeeded));
    match report.outcome("h2") {
        Some(HostOutcome::Failed { task, reason }) => {
            assert_eq!(task, "deploy:update_code");
            assert!(reason.contains("checkout failed"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(*states.lock().unwrap(), vec![("h1".to_string(), ReleaseState::Cleaned)]);

    assert_eq!(current_release(&dir1), "1");
    assert!(!lock_path(&dir1).exists());

    assert!(dir2.path().join("releases/1").is_dir());
    assert!(std::fs::symlink_metadata(dir2.path().join("current")).is_err());
    assert!(!lock_path(&dir2).exists());
    assert!(output.captured().iter().any(|l| l.contains("deploy failed")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rollback_skips_code_and_shared_steps() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);
    for _ in 0..2 {
        let (report, _) = run(offline_recipe(), "deploy", &host, Input::new()).await;
        assert!(report.is_success());
    }

    let checkouts = Arc::new(AtomicUsize::new(0));
    let links = Arc::new(AtomicUsize::new(0));
    let mut recipe = offline_recipe();
    {
        let checkouts = checkouts.clone();
        recipe.task("deploy:update_code", move |_| {
            checkouts.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
    }
    {
        let links = links.clone();
        recipe.task("deploy:shared", move |_| {
            links.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
    }

    let (report, _) = run(recipe, "rollback", &host, Input::new()).await;
    assert_eq!(report.outcome("local"), Some(&HostOutcome::RolledBack));
    assert_eq!(current_release(&dir), "1");
    assert_eq!(checkouts.load(Ordering::SeqCst), 0);
    assert_eq!(links.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalled_lock_command_fails_within_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);

    let remote: Arc<dyn RemoteExecutor> =
        Arc::new(StallingExecutor::before("deploy.lock", Duration::from_secs(10)));
    let options = SchedulerOptions {
        default_timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let started = Instant::now();
    let scheduler = Scheduler::new(offline_recipe(), remote, options);
    let (report, _) = run_on(scheduler, "deploy", &[host.clone()], Input::new()).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    match report.outcome("local") {
        Some(HostOutcome::Failed { task, reason }) => {
            assert_eq!(task, "deploy:lock");
            assert!(reason.contains("Timed out"), "{}", reason);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!lock_path(&dir).exists());
    assert!(std::fs::symlink_metadata(dir.path().join("current")).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalled_unlock_in_failure_hook_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let host = host(&dir);

    // checkout fails without a repository; the hook's unlock then hangs
    let remote: Arc<dyn RemoteExecutor> =
        Arc::new(StallingExecutor::before("grep -qF", Duration::from_secs(10)));
    let options = SchedulerOptions {
        default_timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let started = Instant::now();
    let scheduler = Scheduler::new(common().unwrap(), remote, options);
    let (report, _) = run_on(scheduler, "deploy", &[host.clone()], Input::new()).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    match report.outcome("local") {
        Some(HostOutcome::Failed { task, .. }) => assert_eq!(task, "deploy:update_code"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}
