//! A recipe bundles tasks, config defaults and proxy functions

use std::future::Future;

use serde_json::Value;

use crate::config::{Config, ConfigValue};
use crate::errors::ShipyardError;
use crate::runtime::{FunctionRegistry, Runtime};
use crate::task::definition::{body, Task};
use crate::task::registry::TaskRegistry;

#[derive(Default, Clone)]
pub struct Recipe {
    pub tasks: TaskRegistry,
    pub defaults: Config,
    pub functions: FunctionRegistry,

    /// Keys every selected host must resolve before anything runs
    pub required: Vec<String>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a callback task from an async closure
    pub fn task<F, Fut>(&mut self, name: &str, f: F) -> &mut Task
    where
        F: Fn(Runtime) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ShipyardError>> + Send + 'static,
    {
        self.tasks.task(name, body(f))
    }

    pub fn group(&mut self, name: &str, members: &[&str]) -> &mut Task {
        self.tasks.group(name, members)
    }

    /// Set a global default
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<&mut Self, ShipyardError> {
        self.defaults.set(key, value.into())?;
        Ok(self)
    }

    /// Register a function callable through the coordinator
    pub fn function<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Runtime, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ShipyardError>> + Send + 'static,
    {
        self.functions.register(name, f);
        self
    }

    pub fn require(&mut self, key: &str) -> &mut Self {
        if !self.required.iter().any(|k| k == key) {
            self.required.push(key.to_string());
        }
        self
    }
}
