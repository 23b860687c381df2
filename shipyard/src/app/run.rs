//! Main application run

use std::future::Future;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::context::Output;
use crate::deploy::recipe::common;
use crate::errors::ShipyardError;
use crate::inventory::{Host, Inventory, Settings};
use crate::remote::{HostExecutor, SshExecutor};
use crate::runtime::AbortHandle;
use crate::task::{HostOutcome, Recipe, RunReport, Scheduler};

/// Run a pipeline on the selected hosts.
///
/// A shutdown signal aborts the run; the failure path still gets
/// `max_shutdown_delay` to release locks before the process exits.
pub async fn run(
    options: AppOptions,
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<RunReport, ShipyardError> {
    info!("Initializing shipyard...");

    let recipe = build_recipe(&settings)?;
    let inventory = Inventory::from_settings(&settings);
    let hosts = select_hosts(&inventory, &options)?;

    let remote = Arc::new(HostExecutor::new(SshExecutor::default()));
    let scheduler = Scheduler::new(recipe, remote, options.scheduler.clone())
        .with_input(options.input.clone())
        .with_output(Output::stdout(options.decorated));

    let abort = AbortHandle::new();
    let run = scheduler.run_with_abort(&options.pipeline, &hosts, abort.signal());
    tokio::pin!(run);

    tokio::select! {
        report = &mut run => return report,
        _ = shutdown_signal => {
            warn!("Shutdown signal received, aborting run...");
            abort.abort();
        }
    }

    match tokio::time::timeout(options.lifecycle.max_shutdown_delay, run).await {
        Ok(report) => report,
        Err(_) => {
            error!(
                "Failure path did not finish within {:?}, forcing shutdown...",
                options.lifecycle.max_shutdown_delay
            );
            std::process::exit(1);
        }
    }
}

/// Hosts picked by alias, narrowed to the label filter if one is given
pub fn select_hosts(inventory: &Inventory, options: &AppOptions) -> Result<Vec<Arc<Host>>, ShipyardError> {
    let mut hosts = inventory.select(&options.hosts)?;
    if let Some((key, value)) = &options.label {
        let labelled = inventory.with_label(key, value);
        hosts.retain(|h| labelled.iter().any(|l| l.alias == h.alias));
    }
    if hosts.is_empty() {
        return Err(ShipyardError::ConfigError(
            "No host matches the selection".to_string(),
        ));
    }
    Ok(hosts)
}

/// Common recipe with the inventory's global config layered on top
pub fn build_recipe(settings: &Settings) -> Result<Recipe, ShipyardError> {
    let mut recipe = common()?;
    for (key, value) in &settings.config {
        recipe.set(key, value.clone())?;
    }
    recipe.tasks.validate()?;
    Ok(recipe)
}

/// Visible tasks with their descriptions
pub fn list_tasks(recipe: &Recipe) -> Vec<(String, String)> {
    recipe
        .tasks
        .visible()
        .into_iter()
        .map(|t| (t.name.clone(), t.description.clone().unwrap_or_default()))
        .collect()
}

pub fn print_report(report: &RunReport) {
    println!();
    for (alias, outcome) in &report.hosts {
        let status = match outcome {
            HostOutcome::Succeeded => outcome.to_string().green(),
            HostOutcome::RolledBack => outcome.to_string().yellow(),
            HostOutcome::Failed { .. } => outcome.to_string().red(),
        };
        println!("[{}] {}", alias.cyan(), status);
    }
    if !report.is_success() {
        println!(
            "{}",
            format!("{} failed on: {}", report.pipeline, report.failed_hosts().join(", ")).red()
        );
    }
}
