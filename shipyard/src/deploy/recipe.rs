//! The common deploy recipe: prepare, publish, rollback

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::deferred;
use crate::deploy::fsm::{ReleaseEvent, ReleaseFsm};
use crate::deploy::lock::{LockHandle, LockManager, LOCK_PATH};
use crate::deploy::release::{self, ReleaseLogEntry, BAD_RELEASE_MARKER};
use crate::errors::ShipyardError;
use crate::coordinator::master::FAILURE_KEY;
use crate::runtime::Runtime;
use crate::task::Recipe;
use crate::utils::{local_hostname, shell_quote, value_to_string};

/// Config key holding the serialized [`LockHandle`]
pub const LOCK_HANDLE_KEY: &str = "lock_handle";

/// Recipe with the generic deploy and rollback pipelines
pub fn common() -> Result<Recipe, ShipyardError> {
    let mut recipe = Recipe::new();
    defaults(&mut recipe)?;
    tasks(&mut recipe)?;
    functions(&mut recipe);
    recipe.require("deploy_path");
    Ok(recipe)
}

fn defaults(recipe: &mut Recipe) -> Result<(), ShipyardError> {
    recipe
        .set("keep_releases", json!(10))?
        .set("env", json!({}))?
        .set("current_path", json!("{{deploy_path}}/current"))?
        .set("shared_dirs", json!([]))?
        .set("shared_files", json!([]))?
        .set("writable_dirs", json!([]))?
        .set("writable_mode", json!("chmod"))?
        .set("writable_chmod_mode", json!("0755"))?
        .set("writable_recursive", json!(false))?;

    recipe.set(
        "deploy_path",
        deferred(|_rt| async {
            Err(ShipyardError::ConfigError(
                "Please specify `deploy_path` for every host".to_string(),
            ))
        }),
    )?;

    recipe.set(
        "target",
        deferred(|rt| async move {
            let input = rt.input();
            if let Some(target) = input
                .option("revision")
                .or_else(|| input.option("tag"))
                .or_else(|| input.option("branch"))
            {
                return Ok(json!(target));
            }
            if rt.has("branch") {
                let branch = rt.get_string("branch").await?;
                if !branch.is_empty() {
                    return Ok(json!(branch));
                }
            }
            Ok(json!("HEAD"))
        }),
    )?;

    recipe.set(
        "user",
        deferred(|_rt| async {
            if std::env::var_os("CI").is_some() {
                return Ok(json!("ci"));
            }
            Ok(json!(std::env::var("USER").unwrap_or_else(|_| "no_user".to_string())))
        }),
    )?;

    recipe.set(
        "releases_list",
        deferred(|rt| async move { Ok(json!(release::list(&rt).await?)) }),
    )?;

    recipe.set(
        "release_name",
        deferred(|rt| async move {
            let latest = release::latest_release(&rt).await?;
            let existing = release::list(&rt).await?;
            Ok(json!(release::next_release(latest, &existing).to_string()))
        }),
    )?;

    Ok(())
}

/// Lock manager bound by the run's command timeout and the host's `env`
async fn lock_manager(rt: &Runtime) -> Result<LockManager, ShipyardError> {
    Ok(LockManager::new(rt.remote().clone())
        .with_timeout(rt.default_timeout())
        .with_env(rt.command_env().await?))
}

async fn lock_handle(rt: &Runtime) -> Result<Option<LockHandle>, ShipyardError> {
    match rt.get_or(LOCK_HANDLE_KEY, Value::Null).await? {
        Value::Null => Ok(None),
        value => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Point `link` at `target` with a single rename so `link` never disappears
async fn swap_symlink(rt: &Runtime, target: &str, link: &str) -> Result<(), ShipyardError> {
    let staged = format!("{}.tmp", link);
    rt.run(&format!(
        "ln -sfn {target} {staged} && mv -fT {staged} {link}",
        target = shell_quote(target),
        staged = shell_quote(&staged),
        link = shell_quote(link),
    ))
    .await?;
    Ok(())
}

fn tasks(recipe: &mut Recipe) -> Result<(), ShipyardError> {
    recipe
        .task("deploy:info", |rt| async move {
            let target = rt.get_string("target").await?;
            let path = rt.get_string("deploy_path").await?;
            rt.info(&format!("deploying {} to {}", target, path));
            Ok(())
        })
        .desc("Displays info about deployment");

    recipe
        .task("deploy:setup", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::Setup, async {
                if rt
                    .test("[ -e {{current_path}} ] && [ ! -L {{current_path}} ]")
                    .await?
                {
                    return Err(ShipyardError::DeployError(rt.parse(
                        "There is a directory (not a symlink) at {{current_path}}. \
                         Remove it so it can be replaced with a symlink for atomic deployments.",
                    ).await?));
                }
                rt.run(
                    "mkdir -p {{deploy_path}}/.dep {{deploy_path}}/releases {{deploy_path}}/shared",
                )
                .await?;
                Ok(())
            })
            .await
        })
        .desc("Prepares host for deploy");

    recipe
        .task("deploy:lock", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::Lock, async {
                let host = rt.current_host()?;
                let path = rt.parse(LOCK_PATH).await?;
                let owner = format!("{}@{}", rt.get_string("user").await?, local_hostname());
                let handle = lock_manager(&rt).await?.acquire(&host, &path, &owner).await?;
                rt.set(LOCK_HANDLE_KEY, serde_json::to_value(&handle)?)?;
                Ok(())
            })
            .await
        })
        .desc("Locks deploy");

    recipe
        .task("deploy:release", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::CreateRelease, async {
                let name = rt.get_string("release_name").await?;
                let release_path = rt.parse(&format!("{{{{deploy_path}}}}/releases/{}", name)).await?;

                // plain mkdir: an existing directory means the number was taken
                rt.run(&format!("mkdir {}", shell_quote(&release_path))).await?;
                rt.run(&format!(
                    "echo {} > {{{{deploy_path}}}}/.dep/latest_release",
                    shell_quote(&name)
                ))
                .await?;

                let entry = ReleaseLogEntry {
                    release_name: name.clone(),
                    created_at: Utc::now(),
                    user: rt.get_string("user").await?,
                    target: rt.get_string("target").await?,
                };
                rt.run(&format!(
                    "printf '%s\\n' {} >> {{{{deploy_path}}}}/.dep/releases_log",
                    shell_quote(&serde_json::to_string(&entry)?)
                ))
                .await?;

                rt.set("release_path", json!(release_path))?;
                rt.info(&format!("release {} created", name));
                Ok(())
            })
            .await
        })
        .desc("Prepares release");

    recipe
        .task("deploy:update_code", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::UpdateCode, async {
                if !rt.has("repository") {
                    return Err(ShipyardError::ConfigError(
                        "Missing `repository` config".to_string(),
                    ));
                }
                let repository = rt.get_string("repository").await?;
                let target = rt.get_string("target").await?;
                let repo = rt.parse("{{deploy_path}}/.dep/repo").await?;

                if rt.test(&format!("[ -d {}/refs ]", shell_quote(&repo))).await? {
                    rt.run(&format!(
                        "cd {} && git remote set-url origin {} && git remote update --prune",
                        shell_quote(&repo),
                        shell_quote(&repository)
                    ))
                    .await?;
                } else {
                    rt.run(&format!(
                        "git clone --mirror {} {}",
                        shell_quote(&repository),
                        shell_quote(&repo)
                    ))
                    .await?;
                }
                rt.run(&format!(
                    "cd {repo} && git archive {target} | tar -x -f - -C {{{{release_path}}}} && \
                     git rev-list {target} -1 > {{{{release_path}}}}/REVISION",
                    repo = shell_quote(&repo),
                    target = shell_quote(&target),
                ))
                .await?;
                Ok(())
            })
            .await
        })
        .desc("Updates code");

    recipe
        .task("deploy:shared", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::LinkShared, async {
                let dirs: Vec<String> = rt.get_as("shared_dirs").await?;
                let files: Vec<String> = rt.get_as("shared_files").await?;
                let shared = rt.parse("{{deploy_path}}/shared").await?;
                let release_path = rt.get_string("release_path").await?;

                for dir in dirs.iter().map(|d| d.trim_matches('/')) {
                    let source = shell_quote(&format!("{}/{}", shared, dir));
                    let link = shell_quote(&format!("{}/{}", release_path, dir));
                    rt.run(&format!(
                        "if [ ! -d {source} ]; then mkdir -p {source}; \
                         if [ -d {link} ]; then cp -r {link}/. {source}; fi; fi; \
                         rm -rf {link} && mkdir -p \"$(dirname {link})\" && ln -nfs {source} {link}",
                    ))
                    .await?;
                }
                for file in files.iter().map(|f| f.trim_matches('/')) {
                    let source = shell_quote(&format!("{}/{}", shared, file));
                    let link = shell_quote(&format!("{}/{}", release_path, file));
                    rt.run(&format!(
                        "mkdir -p \"$(dirname {source})\"; \
                         if [ ! -f {source} ] && [ -f {link} ]; then cp {link} {source}; fi; \
                         touch {source} && rm -rf {link} && mkdir -p \"$(dirname {link})\" && \
                         ln -nfs {source} {link}",
                    ))
                    .await?;
                }
                Ok(())
            })
            .await
        })
        .desc("Creates symlinks for shared files and dirs");

    recipe
        .task("deploy:writable", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::SetWritable, async {
                let dirs: Vec<String> = rt.get_as("writable_dirs").await?;
                if dirs.is_empty() {
                    return Ok(());
                }
                let quoted: Vec<String> = dirs.iter().map(|d| shell_quote(d)).collect();
                let quoted = quoted.join(" ");
                match rt.get_string("writable_mode").await?.as_str() {
                    "skip" => Ok(()),
                    "chmod" => {
                        let mode = rt.get_string("writable_chmod_mode").await?;
                        let recursive: bool = rt.get_as("writable_recursive").await?;
                        rt.run(&format!(
                            "cd {{{{release_path}}}} && mkdir -p {dirs} && chmod {flag}{mode} {dirs}",
                            dirs = quoted,
                            flag = if recursive { "-R " } else { "" },
                            mode = shell_quote(&mode),
                        ))
                        .await?;
                        Ok(())
                    }
                    other => Err(ShipyardError::ConfigError(format!(
                        "Unsupported writable_mode `{}`",
                        other
                    ))),
                }
            })
            .await
        })
        .desc("Makes writable dirs");

    recipe
        .task("deploy:symlink", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::Symlink, async {
                let release_path = rt.get_string("release_path").await?;
                let current_path = rt.get_string("current_path").await?;
                swap_symlink(&rt, &release_path, &current_path).await
            })
            .await
        })
        .desc("Creates symlink to release");

    recipe
        .task("deploy:unlock", |rt| async move {
            let fsm = ReleaseFsm::load(&rt).await?;
            let host = rt.current_host()?;
            let manager = lock_manager(&rt).await?;

            if rt.input().has_flag("force-unlock") {
                let path = rt.parse(LOCK_PATH).await?;
                if let Some(record) = manager.force_release(&host, &path).await? {
                    rt.warning(&format!(
                        "removed lock held by {} since {}",
                        record.owner, record.acquired_at
                    ));
                }
            } else if let Some(handle) = lock_handle(&rt).await? {
                manager.release(&host, &handle).await?;
            } else {
                rt.warning("no deploy lock held by this run");
            }
            rt.set(LOCK_HANDLE_KEY, Value::Null)?;

            // standalone `deploy:unlock` has no lifecycle to advance
            if fsm.accepts(&ReleaseEvent::Unlock) {
                ReleaseFsm::advance(&rt, ReleaseEvent::Unlock).await?;
            }
            Ok(())
        })
        .desc("Unlocks deploy");

    recipe
        .task("deploy:cleanup", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::Cleanup, async {
                let releases = release::list(&rt).await?;
                let current = release::current_release(&rt).await?;
                let bad = release::bad_releases(&rt).await?;
                let protected = release::rollback_target(&releases, current, &bad);
                let keep: i64 = rt.get_as("keep_releases").await?;

                for name in release::releases_to_delete(&releases, keep, current, protected) {
                    rt.run(&format!("rm -rf {{{{deploy_path}}}}/releases/{}", name))
                        .await?;
                }
                Ok(())
            })
            .await
        })
        .desc("Cleans up old releases");

    recipe
        .task("deploy:success", |rt| async move {
            rt.info("successfully deployed!");
            Ok(())
        })
        .shallow()
        .hidden();

    recipe
        .task("deploy:failed", |rt| async move {
            let reason = match rt.get_or(FAILURE_KEY, Value::Null).await? {
                Value::Object(failure) => failure
                    .get("reason")
                    .map(value_to_string)
                    .unwrap_or_default(),
                _ => "unknown failure".to_string(),
            };
            ReleaseFsm::advance(&rt, ReleaseEvent::Fail(reason.clone())).await?;

            if let Some(handle) = lock_handle(&rt).await? {
                let host = rt.current_host()?;
                match lock_manager(&rt).await?.release(&host, &handle).await {
                    Ok(()) => rt.set(LOCK_HANDLE_KEY, Value::Null)?,
                    Err(ShipyardError::LockMismatch { path }) => {
                        warn!("[{}] Lock {} now belongs to another deploy", host.alias, path)
                    }
                    Err(e) => return Err(e),
                }
            }
            rt.warning(&format!("deploy failed: {}", reason));
            Ok(())
        })
        .hidden();

    recipe
        .task("rollback:swap", |rt| async move {
            ReleaseFsm::step(&rt, ReleaseEvent::Rollback, async {
                let releases = release::list(&rt).await?;
                let current = release::current_release(&rt).await?.ok_or_else(|| {
                    ShipyardError::DeployError("No current release to roll back from".to_string())
                })?;
                let bad = release::bad_releases(&rt).await?;
                let target = release::rollback_target(&releases, Some(current), &bad)
                    .ok_or_else(|| {
                        ShipyardError::DeployError("No previous release to roll back to".to_string())
                    })?;

                let target_path = rt
                    .parse(&format!("{{{{deploy_path}}}}/releases/{}", target))
                    .await?;
                let current_path = rt.get_string("current_path").await?;
                rt.run(&format!(
                    "touch {{{{deploy_path}}}}/releases/{}/{}",
                    current, BAD_RELEASE_MARKER
                ))
                .await?;
                swap_symlink(&rt, &target_path, &current_path).await?;
                rt.info(&format!("rolled back to release {}", target));
                Ok(())
            })
            .await
        })
        .hidden();

    recipe
        .group(
            "deploy:prepare",
            &[
                "deploy:info",
                "deploy:setup",
                "deploy:lock",
                "deploy:release",
                "deploy:update_code",
                "deploy:shared",
                "deploy:writable",
            ],
        )
        .desc("Prepares a new release");
    recipe
        .group(
            "deploy:publish",
            &["deploy:symlink", "deploy:unlock", "deploy:cleanup", "deploy:success"],
        )
        .desc("Publishes the release");
    recipe
        .group("deploy", &["deploy:prepare", "deploy:publish"])
        .desc("Deploys your project");
    recipe
        .group("rollback", &["deploy:lock", "rollback:swap", "deploy:unlock"])
        .desc("Rollbacks to the previous release");

    recipe.tasks.fail("deploy", "deploy:failed")?;
    recipe.tasks.fail("rollback", "deploy:failed")?;
    Ok(())
}

fn functions(recipe: &mut Recipe) {
    recipe.function("config:get", |rt, args| async move {
        let key = args.first().and_then(Value::as_str).ok_or_else(|| {
            ShipyardError::ConfigError("config:get expects the key as first argument".to_string())
        })?;
        rt.get(key).await
    });
    recipe.function("release:current", |rt, _args| async move {
        Ok(match release::current_release(&rt).await? {
            Some(name) => json!(name),
            None => Value::Null,
        })
    });
    recipe.function("lifecycle:state", |rt, _args| async move {
        Ok(serde_json::to_value(ReleaseFsm::load(&rt).await?)?)
    });
}
