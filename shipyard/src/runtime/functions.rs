//! Functions callable across hosts through the coordinator

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::ShipyardError;
use crate::runtime::Runtime;

pub type ProxyFn =
    dyn Fn(Runtime, Vec<Value>) -> BoxFuture<'static, Result<Value, ShipyardError>> + Send + Sync;

/// Name to function map; proxy requests may only name functions registered here
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<ProxyFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Runtime, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ShipyardError>> + Send + 'static,
    {
        self.functions.insert(
            name.to_string(),
            Arc::new(move |rt, args| Box::pin(f(rt, args))),
        );
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<ProxyFn>, ShipyardError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| ShipyardError::UnknownFunction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
