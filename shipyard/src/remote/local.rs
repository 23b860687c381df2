//! Commands run on the controlling machine

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::remote::{script, spawn_with_timeout, CommandOutput, RemoteExecutor, RunOptions};

/// Runs commands with `bash -c` on this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ShipyardError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(script(command, options, false))
            .envs(&options.env);
        spawn_with_timeout(cmd, &format!("[{}] {}", host.alias, command), options.timeout).await
    }
}
