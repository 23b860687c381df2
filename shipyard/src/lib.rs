//! Shipyard Library
//!
//! Multi-host release orchestration: tasks run per host in isolated worker
//! units that share host config through a coordinating master.

pub mod app;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod inventory;
pub mod logs;
pub mod remote;
pub mod runtime;
pub mod task;
pub mod utils;
pub mod workers;
