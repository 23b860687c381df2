//! Running shell commands on deploy targets

pub mod local;
pub mod ssh;

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::utils::shell_quote;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

/// Per-command execution options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Environment variables exported before the command
    pub env: BTreeMap<String, String>,

    /// Kill the command after this long
    pub timeout: Option<Duration>,

    /// Directory to run the command in
    pub cwd: Option<String>,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_cwd(mut self, cwd: &str) -> Self {
        self.cwd = Some(cwd.to_string());
        self
    }
}

/// What a finished command printed and how it exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,

    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a shell command against a host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ShipyardError>;
}

/// Local hosts run through bash here, everything else over ssh
#[derive(Debug, Clone, Default)]
pub struct HostExecutor {
    local: LocalExecutor,
    ssh: SshExecutor,
}

impl HostExecutor {
    pub fn new(ssh: SshExecutor) -> Self {
        Self {
            local: LocalExecutor,
            ssh,
        }
    }
}

#[async_trait]
impl RemoteExecutor for HostExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ShipyardError> {
        if host.local {
            self.local.run(host, command, options).await
        } else {
            self.ssh.run(host, command, options).await
        }
    }
}

/// Build the script actually executed: optional `cd`, optional exports, the command
pub(crate) fn script(command: &str, options: &RunOptions, export_env: bool) -> String {
    let mut script = String::new();
    if export_env {
        for (key, value) in &options.env {
            script.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
    }
    if let Some(cwd) = &options.cwd {
        script.push_str(&format!("cd {} && ", shell_quote(cwd)));
    }
    script.push_str(command);
    script
}

/// Spawn a prepared command, collect its output and enforce the timeout.
///
/// The child is killed if the future is dropped (timeout or abort).
pub(crate) async fn spawn_with_timeout(
    mut cmd: Command,
    what: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ShipyardError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = match timeout {
        Some(after) => tokio::time::timeout(after, child.wait_with_output())
            .await
            .map_err(|_| ShipyardError::Timeout {
                after,
                what: what.to_string(),
            })??,
        None => child.wait_with_output().await?,
    };

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    };
    debug!("`{}` exited with {:?}", what, result.exit_code);
    Ok(result)
}
