//! Host configuration: layered key/value store with deferred values

pub mod parser;
pub mod store;
pub mod value;

pub use store::{ConfigStore, Lookup};
pub use value::{deferred, snapshot_of, Config, ConfigSnapshot, ConfigValue, DeferredFn, SnapshotEntry};
