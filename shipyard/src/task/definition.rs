//! Task definitions

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::errors::ShipyardError;
use crate::runtime::Runtime;

/// Body of a callback task, run against the current context
pub type TaskBody =
    Arc<dyn Fn(Runtime) -> BoxFuture<'static, Result<(), ShipyardError>> + Send + Sync>;

/// Wrap an async closure as a task body
pub fn body<F, Fut>(f: F) -> TaskBody
where
    F: Fn(Runtime) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ShipyardError>> + Send + 'static,
{
    Arc::new(move |rt| Box::pin(f(rt)))
}

#[derive(Clone)]
pub enum TaskKind {
    Callback(TaskBody),

    /// Runs the named tasks in order
    Group(Vec<String>),
}

/// A named unit of work plus its scheduling metadata
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub description: Option<String>,

    /// Left out of listings
    pub hidden: bool,

    /// Runs once in the master instead of once per host
    pub shallow: bool,

    /// Only the first occurrence in a pipeline runs
    pub once: bool,

    /// Hosts worked on at once for this task
    pub limit: Option<usize>,

    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl Task {
    pub fn new(name: &str, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: None,
            hidden: false,
            shallow: false,
            once: false,
            limit: None,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn desc(&mut self, description: &str) -> &mut Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn hidden(&mut self) -> &mut Self {
        self.hidden = true;
        self
    }

    pub fn shallow(&mut self) -> &mut Self {
        self.shallow = true;
        self
    }

    pub fn once(&mut self) -> &mut Self {
        self.once = true;
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// Run the body. Groups are expanded before execution and never invoked.
    pub async fn invoke(&self, rt: Runtime) -> Result<(), ShipyardError> {
        match &self.kind {
            TaskKind::Callback(f) => f(rt).await,
            TaskKind::Group(_) => Err(ShipyardError::Internal(format!(
                "group `{}` can't be invoked directly",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Task");
        s.field("name", &self.name);
        if let TaskKind::Group(members) = &self.kind {
            s.field("group", members);
        }
        s.field("shallow", &self.shallow)
            .field("once", &self.once)
            .field("limit", &self.limit)
            .finish()
    }
}
