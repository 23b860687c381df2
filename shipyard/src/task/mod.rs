//! Tasks, pipelines and their execution across hosts

pub mod definition;
pub mod recipe;
pub mod registry;
pub mod report;
pub mod scheduler;

pub use definition::{body, Task, TaskBody, TaskKind};
pub use recipe::Recipe;
pub use registry::TaskRegistry;
pub use report::{HostOutcome, RunReport};
pub use scheduler::{Scheduler, SchedulerOptions, Transport};
