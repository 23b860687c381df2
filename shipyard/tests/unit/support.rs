//! Shared test helpers

use std::time::Duration;

use async_trait::async_trait;
use shipyard::errors::ShipyardError;
use shipyard::inventory::Host;
use shipyard::remote::{CommandOutput, LocalExecutor, RemoteExecutor, RunOptions};

/// Local executor where commands containing `needle` stall, like a stuck ssh
/// session. The command's timeout is honored the way the real executors do.
pub struct StallingExecutor {
    needle: &'static str,
    stall: Duration,
    run_first: bool,
}

impl StallingExecutor {
    /// Matching commands hang for `stall` before running
    pub fn before(needle: &'static str, stall: Duration) -> Self {
        Self {
            needle,
            stall,
            run_first: false,
        }
    }

    /// Matching commands run, then the reply hangs for `stall`
    pub fn after(needle: &'static str, stall: Duration) -> Self {
        Self {
            needle,
            stall,
            run_first: true,
        }
    }
}

#[async_trait]
impl RemoteExecutor for StallingExecutor {
    async fn run(
        &self,
        host: &Host,
        command: &str,
        options: &RunOptions,
    ) -> Result<CommandOutput, ShipyardError> {
        if !command.contains(self.needle) {
            return LocalExecutor.run(host, command, options).await;
        }
        let unbounded = RunOptions {
            timeout: None,
            ..options.clone()
        };
        let work = async {
            if self.run_first {
                let output = LocalExecutor.run(host, command, &unbounded).await?;
                tokio::time::sleep(self.stall).await;
                Ok(output)
            } else {
                tokio::time::sleep(self.stall).await;
                LocalExecutor.run(host, command, &unbounded).await
            }
        };
        match options.timeout {
            Some(after) => tokio::time::timeout(after, work).await.unwrap_or(Err(
                ShipyardError::Timeout {
                    after,
                    what: command.to_string(),
                },
            )),
            None => work.await,
        }
    }
}
