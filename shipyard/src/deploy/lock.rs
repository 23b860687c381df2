//! Per-host deploy lock
//!
//! The lock is a file on the target holding a JSON [`LockRecord`]. It is
//! created by hard-linking a fully written temp file into place, which fails if
//! the lock already exists, so two concurrent acquires can't both win.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::remote::{CommandOutput, RemoteExecutor, RunOptions};
use crate::utils::{generate_uuid, shell_quote};

/// Lock file location, relative to the deploy path
pub const LOCK_PATH: &str = "{{deploy_path}}/.dep/deploy.lock";

const ACQUIRED: &str = "+acquired";
const RELEASED: &str = "+released";
const MISMATCH: &str = "+mismatch";
const MISSING: &str = "+missing";

/// Content of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

/// Proof of a successful acquire; stored in the host config between worker units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub host: String,
    pub path: String,
    pub record: LockRecord,
}

pub struct LockManager {
    remote: Arc<dyn RemoteExecutor>,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
}

impl LockManager {
    pub fn new(remote: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            remote,
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    /// Bound every lock command; a command running longer fails with a timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    async fn exec(&self, host: &Host, command: &str) -> Result<String, ShipyardError> {
        let options = RunOptions {
            timeout: self.timeout,
            env: self.env.clone(),
            ..Default::default()
        };
        let output: CommandOutput = self.remote.run(host, command, &options).await?;
        if !output.success() {
            return Err(ShipyardError::RemoteError {
                host: host.alias.clone(),
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Take the lock at `path` or report who holds it. Never waits.
    ///
    /// If the command times out, whatever it may have put in place under this
    /// attempt's token is removed before the timeout is returned.
    pub async fn acquire(&self, host: &Host, path: &str, owner: &str) -> Result<LockHandle, ShipyardError> {
        let record = LockRecord {
            owner: owner.to_string(),
            token: generate_uuid(),
            acquired_at: Utc::now(),
        };
        let line = serde_json::to_string(&record)?;
        let dir = parent_dir(path);
        let staged = format!("{}.{}", path, record.token);

        let command = format!(
            "mkdir -p {dir} && printf '%s\\n' {line} > {staged} && \
             if ln {staged} {path} 2>/dev/null; then rm -f {staged}; echo {ACQUIRED}; \
             else rm -f {staged}; cat {path} 2>/dev/null || true; fi",
            dir = shell_quote(dir),
            line = shell_quote(&line),
            staged = shell_quote(&staged),
            path = shell_quote(path),
        );
        let output = match self.exec(host, &command).await {
            Ok(output) => output,
            Err(e @ ShipyardError::Timeout { .. }) => {
                self.discard(host, path, &staged, &record.token).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if output == ACQUIRED {
            info!("[{}] Acquired deploy lock {}", host.alias, path);
            return Ok(LockHandle {
                host: host.alias.clone(),
                path: path.to_string(),
                record,
            });
        }

        match serde_json::from_str::<LockRecord>(&output) {
            Ok(holder) => Err(ShipyardError::LockHeld {
                owner: holder.owner,
                acquired_at: holder.acquired_at.to_rfc3339(),
            }),
            // removed between our attempt and the read, or not ours to parse
            Err(_) => Err(ShipyardError::LockHeld {
                owner: "unknown".to_string(),
                acquired_at: "unknown".to_string(),
            }),
        }
    }

    /// Remove the lock if it still carries the handle's token
    pub async fn release(&self, host: &Host, handle: &LockHandle) -> Result<(), ShipyardError> {
        let needle = token_needle(&handle.record.token);
        let path = shell_quote(&handle.path);
        let command = format!(
            "if grep -qF {needle} {path} 2>/dev/null; then rm -f {path} && echo {RELEASED}; \
             elif [ -e {path} ]; then echo {MISMATCH}; else echo {MISSING}; fi",
            needle = shell_quote(&needle),
            path = path,
        );

        match self.exec(host, &command).await?.as_str() {
            RELEASED => {
                info!("[{}] Released deploy lock {}", host.alias, handle.path);
                Ok(())
            }
            MISSING => {
                warn!("[{}] Deploy lock {} was already gone", host.alias, handle.path);
                Ok(())
            }
            MISMATCH => Err(ShipyardError::LockMismatch {
                path: handle.path.clone(),
            }),
            other => Err(ShipyardError::DeployError(format!(
                "Unexpected reply while releasing {}: {}",
                handle.path, other
            ))),
        }
    }

    /// Remove the staged file and the lock if it carries `token`
    async fn discard(&self, host: &Host, path: &str, staged: &str, token: &str) {
        let command = format!(
            "rm -f {staged}; if grep -qF {needle} {path} 2>/dev/null; then rm -f {path}; fi",
            staged = shell_quote(staged),
            needle = shell_quote(&token_needle(token)),
            path = shell_quote(path),
        );
        match self.exec(host, &command).await {
            Ok(_) => warn!(
                "[{}] Lock acquire on {} timed out, removed anything it left behind",
                host.alias, path
            ),
            Err(e) => warn!(
                "[{}] Lock acquire on {} timed out and cleanup failed: {}",
                host.alias, path, e
            ),
        }
    }

    /// Remove the lock whoever holds it. Returns the removed record.
    pub async fn force_release(&self, host: &Host, path: &str) -> Result<Option<LockRecord>, ShipyardError> {
        let quoted = shell_quote(path);
        let command = format!(
            "if [ -e {p} ]; then cat {p}; rm -f {p}; fi",
            p = quoted
        );
        let output = self.exec(host, &command).await?;
        let removed = parse_record(&output);
        match &removed {
            Some(record) => warn!(
                "[{}] Forced removal of deploy lock {} held by {} since {}",
                host.alias, path, record.owner, record.acquired_at
            ),
            None if output.is_empty() => {
                warn!("[{}] Forced unlock requested but {} does not exist", host.alias, path)
            }
            None => warn!("[{}] Forced removal of unreadable deploy lock {}", host.alias, path),
        }
        Ok(removed)
    }

    /// Current holder, if locked
    pub async fn inspect(&self, host: &Host, path: &str) -> Result<Option<LockRecord>, ShipyardError> {
        let output = self
            .exec(host, &format!("cat {} 2>/dev/null || true", shell_quote(path)))
            .await?;
        Ok(parse_record(&output))
    }
}

fn parse_record(output: &str) -> Option<LockRecord> {
    if output.is_empty() {
        return None;
    }
    serde_json::from_str(output).ok()
}

fn token_needle(token: &str) -> String {
    format!("\"token\":\"{}\"", token)
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}
