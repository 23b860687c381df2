//! Task registry and pipeline expansion

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::errors::ShipyardError;
use crate::task::definition::{Task, TaskBody, TaskKind};

#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
    fail_hooks: HashMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) a callback task
    pub fn task(&mut self, name: &str, body: TaskBody) -> &mut Task {
        self.define(Task::new(name, TaskKind::Callback(body)))
    }

    /// Define (or redefine) a group of tasks
    pub fn group(&mut self, name: &str, members: &[&str]) -> &mut Task {
        let members = members.iter().map(|m| m.to_string()).collect();
        self.define(Task::new(name, TaskKind::Group(members)))
    }

    // hooks already attached to the name survive a redefinition
    fn define(&mut self, mut task: Task) -> &mut Task {
        if let Some(previous) = self.tasks.remove(&task.name) {
            task.before = previous.before;
            task.after = previous.after;
        }
        let name = task.name.clone();
        self.tasks.entry(name).or_insert(task)
    }

    /// Run `hook` right before `target`
    pub fn before(&mut self, target: &str, hook: &str) -> Result<(), ShipyardError> {
        self.require(hook)?;
        self.get_mut(target)?.before.push(hook.to_string());
        Ok(())
    }

    /// Run `hook` right after `target`
    pub fn after(&mut self, target: &str, hook: &str) -> Result<(), ShipyardError> {
        self.require(hook)?;
        self.get_mut(target)?.after.push(hook.to_string());
        Ok(())
    }

    /// Run `hook` for the failed hosts once `pipeline` is done
    pub fn fail(&mut self, pipeline: &str, hook: &str) -> Result<(), ShipyardError> {
        self.require(pipeline)?;
        self.require(hook)?;
        self.fail_hooks
            .insert(pipeline.to_string(), hook.to_string());
        Ok(())
    }

    pub fn failure_hook(&self, pipeline: &str) -> Option<&str> {
        self.fail_hooks.get(pipeline).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&Task, ShipyardError> {
        self.tasks
            .get(name)
            .ok_or_else(|| ShipyardError::UnknownTask(name.to_string()))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Task, ShipyardError> {
        self.tasks
            .get_mut(name)
            .ok_or_else(|| ShipyardError::UnknownTask(name.to_string()))
    }

    fn require(&self, name: &str) -> Result<(), ShipyardError> {
        self.get(name).map(|_| ())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Non-hidden tasks, sorted by name
    pub fn visible(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| !t.hidden).collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Flatten a pipeline into the callback tasks to run, in order.
    ///
    /// Each name expands to its before hooks, itself (or its members), then its
    /// after hooks. A `once` task only appears at its first position.
    pub fn resolve(&self, pipeline: &str) -> Result<Vec<Task>, ShipyardError> {
        self.get(pipeline)?;
        let mut chain = Vec::new();
        let mut seen_once = HashSet::new();
        let mut ops = Vec::new();
        self.expand(pipeline, &mut chain, &mut seen_once, &mut ops)?;
        debug!(
            "Resolved `{}` into {:?}",
            pipeline,
            ops.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        Ok(ops)
    }

    fn expand(
        &self,
        name: &str,
        chain: &mut Vec<String>,
        seen_once: &mut HashSet<String>,
        ops: &mut Vec<Task>,
    ) -> Result<(), ShipyardError> {
        if chain.iter().any(|n| n == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(ShipyardError::CycleError { chain: cycle });
        }
        let task = self.tasks.get(name).ok_or_else(|| {
            ShipyardError::ConfigError(format!(
                "Task `{}` referenced by `{}` is not defined",
                name,
                chain.last().map(String::as_str).unwrap_or("<pipeline>")
            ))
        })?;
        if task.once && !seen_once.insert(name.to_string()) {
            return Ok(());
        }

        chain.push(name.to_string());
        for hook in &task.before {
            self.expand(hook, chain, seen_once, ops)?;
        }
        match &task.kind {
            TaskKind::Callback(_) => ops.push(task.clone()),
            TaskKind::Group(members) => {
                for member in members {
                    self.expand(member, chain, seen_once, ops)?;
                }
            }
        }
        for hook in &task.after {
            self.expand(hook, chain, seen_once, ops)?;
        }
        chain.pop();
        Ok(())
    }

    /// Expand every task so broken references and cycles surface at startup
    pub fn validate(&self) -> Result<(), ShipyardError> {
        let mut names: Vec<&String> = self.tasks.keys().collect();
        names.sort();
        for name in names {
            self.resolve(name)?;
        }
        for hook in self.fail_hooks.values() {
            self.resolve(hook)?;
        }
        Ok(())
    }
}
