//! LIFO stack of active contexts

use std::sync::{Arc, Mutex};

use tracing::error;

use crate::context::Context;
use crate::errors::ShipyardError;

/// Context stack owned by one execution unit (the master or one worker).
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Mutex<Vec<Context>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, context: Context) {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.push(context);
    }

    /// Pop the innermost context. An empty stack is a programming error.
    pub fn pop(&self) -> Result<Context, ShipyardError> {
        let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.pop().ok_or_else(|| {
            error!("Attempted to pop an empty context stack");
            ShipyardError::EmptyContextStack
        })
    }

    pub fn current(&self) -> Result<Context, ShipyardError> {
        let frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.last().cloned().ok_or(ShipyardError::EmptyContextStack)
    }

    pub fn depth(&self) -> usize {
        let frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
        frames.len()
    }

    /// Push a context for the lifetime of the returned guard
    pub fn enter(self: &Arc<Self>, context: Context) -> ContextGuard {
        let depth = {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            frames.push(context);
            frames.len()
        };
        ContextGuard {
            stack: self.clone(),
            depth,
        }
    }
}

/// Pops its context when dropped, whatever way the scope is left
#[must_use = "the context is popped as soon as the guard is dropped"]
pub struct ContextGuard {
    stack: Arc<ContextStack>,
    depth: usize,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let mut frames = self.stack.frames.lock().unwrap_or_else(|e| e.into_inner());
        if frames.len() < self.depth {
            error!(
                "Context stack underflow: expected depth {}, found {}",
                self.depth,
                frames.len()
            );
            return;
        }
        if frames.len() > self.depth {
            // Inner frames pushed without a guard are unwound with this one
            error!(
                "Context stack leaked {} frame(s), unwinding",
                frames.len() - self.depth
            );
        }
        frames.truncate(self.depth - 1);
    }
}
