//! Execution unit state: config view, context stack and collaborators
//!
//! A [`Runtime`] is what task bodies, deferred config values and proxy
//! functions receive. The master owns one holding the authoritative config for
//! every host; each worker unit gets its own holding a local view of a single
//! host and a handle to the coordinator.

pub mod abort;
pub mod functions;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::parser::{self, Segment};
use crate::config::{Config, ConfigSnapshot, ConfigStore, ConfigValue, Lookup};
use crate::context::{Context, ContextGuard, ContextStack, Input, Output};
use crate::coordinator::Coordinator;
use crate::errors::ShipyardError;
use crate::inventory::Host;
use crate::remote::{RemoteExecutor, RunOptions};
use crate::utils::value_to_string;

pub use abort::{AbortHandle, AbortSignal};
pub use functions::{FunctionRegistry, ProxyFn};

/// Maximum `{{key}}` nesting before a value is considered self-referencing
pub const MAX_INTERPOLATION_DEPTH: usize = 32;

/// Which side of the coordinator this runtime lives on
#[derive(Clone)]
pub enum Role {
    Master,
    Worker(Arc<dyn Coordinator>),
}

/// Collaborators shared by the master and every worker of a run
#[derive(Clone)]
pub struct RuntimeParts {
    pub defaults: Arc<Config>,
    pub functions: Arc<FunctionRegistry>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub input: Arc<Input>,
    pub output: Output,
    pub abort: AbortSignal,
    pub default_timeout: Option<Duration>,
}

impl RuntimeParts {
    pub fn new(remote: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            defaults: Arc::new(Config::new()),
            functions: Arc::new(FunctionRegistry::new()),
            remote,
            input: Arc::new(Input::new()),
            output: Output::default(),
            abort: AbortSignal::never(),
            default_timeout: None,
        }
    }

    pub fn with_abort(&self, abort: AbortSignal) -> Self {
        Self {
            abort,
            ..self.clone()
        }
    }
}

struct Inner {
    role: Role,
    store: ConfigStore,
    stack: Arc<ContextStack>,
    hosts: HashMap<String, Arc<Host>>,
    parts: RuntimeParts,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Master runtime holding every host's declared config
    pub fn master(parts: RuntimeParts, hosts: &[Arc<Host>]) -> Self {
        let store = ConfigStore::new(parts.defaults.clone());
        for host in hosts {
            store.insert_host(&host.alias, host.config.clone());
        }
        Self::build(Role::Master, store, hosts, parts)
    }

    /// Worker runtime for one host, seeded from a coordinator snapshot
    pub fn worker(
        parts: RuntimeParts,
        host: Arc<Host>,
        snapshot: ConfigSnapshot,
        coordinator: Arc<dyn Coordinator>,
    ) -> Result<Self, ShipyardError> {
        let store = ConfigStore::new(parts.defaults.clone());
        store.insert_host(&host.alias, host.config.clone());
        store.merge(&host.alias, snapshot)?;
        Ok(Self::build(Role::Worker(coordinator), store, &[host], parts))
    }

    fn build(role: Role, store: ConfigStore, hosts: &[Arc<Host>], parts: RuntimeParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                role,
                store,
                stack: Arc::new(ContextStack::new()),
                hosts: hosts
                    .iter()
                    .map(|h| (h.alias.clone(), h.clone()))
                    .collect(),
                parts,
            }),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.inner.role, Role::Master)
    }

    pub fn stack(&self) -> &Arc<ContextStack> {
        &self.inner.stack
    }

    pub fn current(&self) -> Result<Context, ShipyardError> {
        self.inner.stack.current()
    }

    pub fn current_host(&self) -> Result<Arc<Host>, ShipyardError> {
        Ok(self.current()?.host().clone())
    }

    pub fn host(&self, alias: &str) -> Result<Arc<Host>, ShipyardError> {
        self.inner
            .hosts
            .get(alias)
            .cloned()
            .ok_or_else(|| ShipyardError::UnknownHost(alias.to_string()))
    }

    pub fn input(&self) -> &Input {
        &self.inner.parts.input
    }

    pub fn remote(&self) -> &Arc<dyn RemoteExecutor> {
        &self.inner.parts.remote
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.inner.parts.functions
    }

    /// Timeout applied to remote commands that don't set their own
    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.parts.default_timeout
    }

    /// Push a context for `alias` until the guard is dropped
    pub fn enter(&self, alias: &str) -> Result<ContextGuard, ShipyardError> {
        let host = self.host(alias)?;
        let context = Context::new(
            host,
            self.inner.parts.input.clone(),
            self.inner.parts.output.clone(),
        );
        Ok(self.inner.stack.enter(context))
    }

    fn current_alias(&self) -> Option<String> {
        self.current().ok().map(|c| c.host().alias.clone())
    }

    // ================================ CONFIG ================================= //

    /// Resolve a config key for the current host (or the defaults with no context)
    pub async fn get(&self, key: &str) -> Result<Value, ShipyardError> {
        self.resolve(key.to_string(), 0).await
    }

    pub async fn get_string(&self, key: &str) -> Result<String, ShipyardError> {
        Ok(value_to_string(&self.get(key).await?))
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ShipyardError> {
        let value = self.get(key).await?;
        serde_json::from_value(value).map_err(|e| {
            ShipyardError::ConfigError(format!("Config option `{}` has an unexpected shape: {}", key, e))
        })
    }

    /// Like [`Runtime::get`] but a missing key yields `default`
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, ShipyardError> {
        if self.has(key) {
            self.get(key).await
        } else {
            Ok(default)
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner
            .store
            .has(self.current_alias().as_deref(), key)
    }

    /// Set a key on the current host. Fails once the key was memoized.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> Result<(), ShipyardError> {
        let alias = self.current_alias().ok_or(ShipyardError::EmptyContextStack)?;
        self.inner.store.set(&alias, key, value.into())
    }

    /// Forget a memoized value on the current host so it is computed again
    pub fn invalidate(&self, key: &str) -> Result<bool, ShipyardError> {
        let alias = self.current_alias().ok_or(ShipyardError::EmptyContextStack)?;
        Ok(self.inner.store.invalidate(&alias, key))
    }

    /// Interpolate `{{key}}` references for the current host
    pub async fn parse(&self, template: &str) -> Result<String, ShipyardError> {
        let value = self.interpolate(Value::String(template.to_string()), 0).await?;
        Ok(value_to_string(&value))
    }

    fn resolve(&self, key: String, depth: usize) -> BoxFuture<'static, Result<Value, ShipyardError>> {
        let rt = self.clone();
        Box::pin(async move {
            if depth > MAX_INTERPOLATION_DEPTH {
                return Err(ShipyardError::ConfigError(format!(
                    "Config option `{}` is nested more than {} levels deep; does it reference itself?",
                    key, MAX_INTERPOLATION_DEPTH
                )));
            }

            let alias = rt.current_alias();
            let lookup = match &alias {
                Some(alias) => rt.inner.store.lookup(alias, &key)?,
                None => rt.inner.store.lookup_default(&key),
            };
            let raw = match lookup {
                Some(Lookup::Ready(value)) => value,
                Some(Lookup::Pending(f)) => {
                    let value = f(rt.clone()).await?;
                    if let Some(alias) = &alias {
                        debug!("Memoized `{}` for {}", key, alias);
                        rt.inner.store.memoize(alias, &key, value.clone());
                    }
                    value
                }
                None => {
                    return Err(ShipyardError::ConfigError(format!(
                        "Config option `{}` does not exist",
                        key
                    )))
                }
            };
            rt.interpolate(raw, depth + 1).await
        })
    }

    fn interpolate(&self, value: Value, depth: usize) -> BoxFuture<'static, Result<Value, ShipyardError>> {
        let rt = self.clone();
        Box::pin(async move {
            match value {
                Value::String(s) if parser::has_references(&s) => {
                    let mut out = String::new();
                    for segment in parser::parse(&s) {
                        match segment {
                            Segment::Text(text) => out.push_str(&text),
                            Segment::Key(key) => {
                                let resolved = rt.resolve(key, depth).await?;
                                out.push_str(&value_to_string(&resolved));
                            }
                        }
                    }
                    Ok(Value::String(out))
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(rt.interpolate(item, depth).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key, rt.interpolate(item, depth).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other),
            }
        })
    }

    // ============================ REMOTE COMMANDS ============================ //

    /// Run a command on the current host and return its trimmed stdout
    pub async fn run(&self, command: &str) -> Result<String, ShipyardError> {
        self.run_with(command, RunOptions::default()).await
    }

    pub async fn run_with(&self, command: &str, mut options: RunOptions) -> Result<String, ShipyardError> {
        let host = self.current_host()?;
        let command = self.parse(command).await?;

        for (key, value) in self.command_env().await? {
            options.env.entry(key).or_insert(value);
        }
        if options.timeout.is_none() {
            options.timeout = self.inner.parts.default_timeout;
        }
        if let Some(cwd) = options.cwd.take() {
            options.cwd = Some(self.parse(&cwd).await?);
        }

        debug!("[{}] run {}", host.alias, command);
        let abort = self.inner.parts.abort.clone();
        let output = tokio::select! {
            output = self.inner.parts.remote.run(&host, &command, &options) => output?,
            _ = abort.aborted() => return Err(ShipyardError::Aborted),
        };

        if !output.success() {
            return Err(ShipyardError::RemoteError {
                host: host.alias.clone(),
                command,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// The `env` config of the current host, interpolated
    pub async fn command_env(&self) -> Result<BTreeMap<String, String>, ShipyardError> {
        if !self.has("env") {
            return Ok(BTreeMap::new());
        }
        match self.get("env").await? {
            Value::Object(env) => Ok(env
                .into_iter()
                .map(|(key, value)| (key, value_to_string(&value)))
                .collect()),
            _ => Ok(BTreeMap::new()),
        }
    }

    /// Evaluate a shell condition on the current host
    pub async fn test(&self, condition: &str) -> Result<bool, ShipyardError> {
        let output = self
            .run(&format!("if {}; then echo +true; fi", condition))
            .await?;
        Ok(output == "+true")
    }

    // ================================ PROXY ================================== //

    /// Call a registered function in the context of another host.
    ///
    /// Workers go through the coordinator; the master invokes directly.
    pub async fn on(&self, alias: &str, func: &str, args: Vec<Value>) -> Result<Value, ShipyardError> {
        match &self.inner.role {
            Role::Master => self.invoke(alias, func, args).await,
            Role::Worker(coordinator) => Ok(coordinator.proxy(alias, func, args).await?),
        }
    }

    /// Invoke a registered function with `alias` as the current context
    pub async fn invoke(&self, alias: &str, func: &str, args: Vec<Value>) -> Result<Value, ShipyardError> {
        let f = self.inner.parts.functions.get(func)?;
        let _guard = self.enter(alias)?;
        f(self.clone(), args).await
    }

    // ================================ OUTPUT ================================= //

    pub fn info(&self, line: &str) {
        self.inner
            .parts
            .output
            .writeln(self.current_alias().as_deref(), line);
    }

    pub fn warning(&self, line: &str) {
        self.inner
            .parts
            .output
            .warning(self.current_alias().as_deref(), line);
    }

    // ============================ STORE ACCESS =============================== //

    pub fn snapshot(&self, alias: &str) -> Result<ConfigSnapshot, ShipyardError> {
        self.inner.store.snapshot(alias)
    }

    pub fn merge(&self, alias: &str, snapshot: ConfigSnapshot) -> Result<(), ShipyardError> {
        self.inner.store.merge(alias, snapshot)
    }

    /// Current plain value of a host's own key, nothing evaluated
    pub fn peek(&self, alias: &str, key: &str) -> Option<Value> {
        self.inner.store.peek(alias, key)
    }

    /// Overwrite a host's key regardless of memoization
    pub fn put(&self, alias: &str, key: &str, value: Value) -> Result<(), ShipyardError> {
        self.inner.store.put(alias, key, value)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("master", &self.is_master())
            .field("depth", &self.inner.stack.depth())
            .finish()
    }
}
