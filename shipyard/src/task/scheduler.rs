//! Pipeline execution across hosts

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

use crate::context::{Input, Output};
use crate::coordinator::serve::{serve, ServerOptions};
use crate::coordinator::state::ServerState;
use crate::coordinator::{Coordinator, HttpCoordinator, Master};
use crate::deploy::fsm::ReleaseFsm;
use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::remote::RemoteExecutor;
use crate::runtime::{AbortSignal, Runtime, RuntimeParts};
use crate::task::definition::Task;
use crate::task::recipe::Recipe;
use crate::task::report::{HostOutcome, RunReport};
use crate::workers;

/// How worker units reach the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Loopback HTTP server
    Http,

    /// Direct calls on the master
    InProcess,
}

/// Scheduler options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of worker units running at once
    pub max_concurrency: usize,

    /// Timeout applied to remote commands that don't set one
    pub default_timeout: Option<Duration>,

    /// Timeout for a single coordinator call
    pub rpc_timeout: Duration,

    pub transport: Transport,

    pub server: ServerOptions,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            default_timeout: Some(Duration::from_secs(300)),
            rpc_timeout: Duration::from_secs(60),
            transport: Transport::Http,
            server: ServerOptions::default(),
        }
    }
}

type Failures = BTreeMap<String, (String, String)>;

pub struct Scheduler {
    recipe: Recipe,
    remote: Arc<dyn RemoteExecutor>,
    input: Arc<Input>,
    output: Output,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(recipe: Recipe, remote: Arc<dyn RemoteExecutor>, options: SchedulerOptions) -> Self {
        Self {
            recipe,
            remote,
            input: Arc::new(Input::new()),
            output: Output::default(),
            options,
        }
    }

    pub fn with_input(mut self, input: Input) -> Self {
        self.input = Arc::new(input);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub async fn run(&self, pipeline: &str, hosts: &[Arc<Host>]) -> Result<RunReport, ShipyardError> {
        self.run_with_abort(pipeline, hosts, AbortSignal::never()).await
    }

    /// Run `pipeline` on `hosts`.
    ///
    /// `Err` means nothing ran (bad pipeline, missing config). Host failures are
    /// reported in the [`RunReport`].
    pub async fn run_with_abort(
        &self,
        pipeline: &str,
        hosts: &[Arc<Host>],
        abort: AbortSignal,
    ) -> Result<RunReport, ShipyardError> {
        let ops = self.recipe.tasks.resolve(pipeline)?;
        let hook_ops = match self.recipe.tasks.failure_hook(pipeline) {
            Some(hook) => self.recipe.tasks.resolve(hook)?,
            None => Vec::new(),
        };
        if hosts.is_empty() {
            return Err(ShipyardError::ConfigError("No hosts selected".to_string()));
        }

        let parts = RuntimeParts {
            defaults: Arc::new(self.recipe.defaults.clone()),
            functions: Arc::new(self.recipe.functions.clone()),
            remote: self.remote.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            abort: AbortSignal::never(),
            default_timeout: self.options.default_timeout,
        };
        let master = Arc::new(Master::new(Runtime::master(parts.clone(), hosts)));
        self.preflight(master.runtime(), hosts).await?;

        let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
        let (coordinator, server_handle): (Arc<dyn Coordinator>, _) = match self.options.transport {
            Transport::Http => {
                let state = Arc::new(ServerState::new(master.clone()));
                let mut shutdown_rx = shutdown_tx.subscribe();
                let (addr, handle) = serve(&self.options.server, state, async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await?;
                let client: Arc<dyn Coordinator> =
                    Arc::new(HttpCoordinator::new(addr, self.options.rpc_timeout)?);
                (client, Some(handle))
            }
            Transport::InProcess => {
                let direct: Arc<dyn Coordinator> = master.clone();
                (direct, None)
            }
        };

        info!("Running `{}` on {} host(s)", pipeline, hosts.len());
        let mut failures = Failures::new();
        for op in &ops {
            let live: Vec<Arc<Host>> = hosts
                .iter()
                .filter(|h| !failures.contains_key(&h.alias))
                .cloned()
                .collect();
            if live.is_empty() {
                break;
            }
            if abort.is_aborted() {
                warn!("Run aborted before `{}`", op.name);
                for host in &live {
                    failures.insert(host.alias.clone(), (op.name.clone(), ShipyardError::Aborted.to_string()));
                }
                break;
            }

            self.output.writeln(None, &format!("task {}", op.name));
            if op.shallow {
                if let Err(e) = run_shallow(op, &master, &abort).await {
                    error!("Task `{}` failed: {}", op.name, e);
                    for host in &live {
                        failures.insert(host.alias.clone(), (op.name.clone(), e.to_string()));
                    }
                }
                continue;
            }

            let results = self
                .dispatch(op, &live, parts.with_abort(abort.clone()), coordinator.clone())
                .await;
            for (alias, result) in results {
                if let Err(e) = result {
                    error!("[{}] Task `{}` failed: {}", alias, op.name, e);
                    failures.insert(alias, (op.name.clone(), e.to_string()));
                }
            }
        }

        for (alias, (task, reason)) in &failures {
            master.record_failure(alias, task, reason).await;
        }
        if !failures.is_empty() && !hook_ops.is_empty() {
            let failed: Vec<Arc<Host>> = hosts
                .iter()
                .filter(|h| failures.contains_key(&h.alias))
                .cloned()
                .collect();
            self.run_failure_hook(&hook_ops, failed, &master, &parts, coordinator.clone())
                .await;
        }

        let _ = shutdown_tx.send(());
        drop(coordinator);
        if let Some(handle) = server_handle {
            match handle.await {
                Ok(Err(e)) => warn!("Coordinator server stopped with error: {}", e),
                Err(e) => warn!("Coordinator server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        Ok(build_report(pipeline, hosts, &failures, &master))
    }

    /// Resolve the required keys for every host before anything remote happens
    async fn preflight(&self, rt: &Runtime, hosts: &[Arc<Host>]) -> Result<(), ShipyardError> {
        for host in hosts {
            let _guard = rt.enter(&host.alias)?;
            for key in &self.recipe.required {
                rt.get(key).await.map_err(|e| {
                    ShipyardError::ConfigError(format!("Host `{}`: {}", host.alias, e))
                })?;
            }
        }
        Ok(())
    }

    /// Start one worker unit per host, at most `min(max_concurrency, task.limit)` at once
    async fn dispatch(
        &self,
        task: &Task,
        hosts: &[Arc<Host>],
        parts: RuntimeParts,
        coordinator: Arc<dyn Coordinator>,
    ) -> Vec<(String, Result<(), ShipyardError>)> {
        let limit = task
            .limit
            .map_or(self.options.max_concurrency, |l| l.min(self.options.max_concurrency))
            .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut handles = Vec::with_capacity(hosts.len());
        for host in hosts {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    handles.push((host.alias.clone(), Err(ShipyardError::Internal(e.to_string()))));
                    continue;
                }
            };
            let task = task.clone();
            let host = host.clone();
            let parts = parts.clone();
            let coordinator = coordinator.clone();
            let alias = host.alias.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                workers::host::run(&task, host, parts, coordinator).await
            });
            handles.push((alias, Ok(handle)));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (alias, handle) in handles {
            let result = match handle {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ShipyardError::Internal(format!(
                        "worker for {} stopped unexpectedly: {}",
                        alias, e
                    ))),
                },
                Err(e) => Err(e),
            };
            results.push((alias, result));
        }
        results
    }

    /// Run the failure hook for the failed hosts. Errors are logged only.
    async fn run_failure_hook(
        &self,
        ops: &[Task],
        mut hosts: Vec<Arc<Host>>,
        master: &Arc<Master>,
        parts: &RuntimeParts,
        coordinator: Arc<dyn Coordinator>,
    ) {
        info!(
            "Running failure hook for {}",
            hosts.iter().map(|h| h.alias.as_str()).collect::<Vec<_>>().join(", ")
        );
        let never = AbortSignal::never();
        for op in ops {
            if hosts.is_empty() {
                break;
            }
            self.output.writeln(None, &format!("task {}", op.name));
            if op.shallow {
                if let Err(e) = run_shallow(op, master, &never).await {
                    error!("Failure hook `{}` failed: {}", op.name, e);
                }
                continue;
            }
            let results = self
                .dispatch(op, &hosts, parts.with_abort(never.clone()), coordinator.clone())
                .await;
            for (alias, result) in results {
                if let Err(e) = result {
                    error!("[{}] Failure hook `{}` failed: {}", alias, op.name, e);
                    hosts.retain(|h| h.alias != alias);
                }
            }
        }
    }
}

/// Shallow tasks run once in the master, holding the coordinator gate
async fn run_shallow(op: &Task, master: &Master, abort: &AbortSignal) -> Result<(), ShipyardError> {
    let _gate = master.exclusive().await;
    tokio::select! {
        result = op.invoke(master.runtime().clone()) => result,
        _ = abort.aborted() => Err(ShipyardError::Aborted),
    }
}

fn build_report(pipeline: &str, hosts: &[Arc<Host>], failures: &Failures, master: &Master) -> RunReport {
    let outcomes = hosts
        .iter()
        .map(|host| {
            let outcome = match failures.get(&host.alias) {
                Some((task, reason)) => HostOutcome::Failed {
                    task: task.clone(),
                    reason: reason.clone(),
                },
                None if ReleaseFsm::stored(master.runtime(), &host.alias)
                    .is_some_and(|fsm| fsm.rolled_back()) =>
                {
                    HostOutcome::RolledBack
                }
                None => HostOutcome::Succeeded,
            };
            (host.alias.clone(), outcome)
        })
        .collect();
    RunReport {
        pipeline: pipeline.to_string(),
        hosts: outcomes,
    }
}
