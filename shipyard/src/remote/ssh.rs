//! Commands run over the system ssh client

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::remote::{script, spawn_with_timeout, CommandOutput, RemoteExecutor, RunOptions};
use crate::utils::shell_quote;

/// Shells out to `ssh` for every command
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    default_arguments: Vec<String>,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            default_arguments: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}

impl SshExecutor {
    pub fn new(program: &str, default_arguments: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            default_arguments,
        }
    }

    /// Arguments for one invocation, remote command last
    pub fn arguments(&self, host: &Host, command: &str, options: &RunOptions) -> Vec<String> {
        let mut args = self.default_arguments.clone();
        if let Some(port) = host.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &host.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.extend(host.ssh_arguments.iter().cloned());
        args.push(host.connection_string());
        args.push(format!(
            "bash -c {}",
            shell_quote(&script(command, options, true))
        ));
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ShipyardError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.arguments(host, command, options));
        let output =
            spawn_with_timeout(cmd, &format!("[{}] {}", host.alias, command), options.timeout)
                .await?;

        // ssh reserves 255 for its own failures
        if output.exit_code == Some(255) {
            return Err(ShipyardError::RemoteError {
                host: host.alias.clone(),
                command: command.to_string(),
                exit_code: Some(255),
                stderr: format!("ssh connection failed: {}", output.stderr.trim()),
            });
        }
        Ok(output)
    }
}
