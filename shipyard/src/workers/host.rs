//! Worker unit: one task on one host

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::runtime::{Runtime, RuntimeParts};
use crate::task::Task;

/// Run `task` against `host`: load, enter context, body, leave, save.
///
/// The config is saved back even when the body fails so state like the lock
/// handle reaches the failure hook.
pub async fn run(
    task: &Task,
    host: Arc<Host>,
    parts: RuntimeParts,
    coordinator: Arc<dyn Coordinator>,
) -> Result<(), ShipyardError> {
    if parts.abort.is_aborted() {
        return Err(ShipyardError::Aborted);
    }

    let alias = host.alias.clone();
    let snapshot = coordinator.load(&alias).await?;
    let rt = Runtime::worker(parts, host, snapshot, coordinator.clone())?;

    debug!("[{}] {} starting", alias, task.name);
    let result = {
        let _guard = rt.enter(&alias)?;
        task.invoke(rt.clone()).await
    };

    let saved = match rt.snapshot(&alias) {
        Ok(snapshot) => coordinator.save(&alias, snapshot).await,
        Err(e) => Err(e),
    };

    match (result, saved) {
        (Err(e), saved) => {
            if let Err(save_error) = saved {
                error!("[{}] Failed to save config after error: {}", alias, save_error);
            }
            Err(e)
        }
        (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => {
            info!("[{}] {} done", alias, task.name);
            Ok(())
        }
    }
}
