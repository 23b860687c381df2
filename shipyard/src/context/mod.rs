//! Execution contexts: which host, input and output are in effect

pub mod io;
pub mod stack;

use std::sync::Arc;

use crate::inventory::Host;

pub use io::{Input, Output};
pub use stack::{ContextGuard, ContextStack};

/// Immutable (host, input, output) triple
#[derive(Debug, Clone)]
pub struct Context {
    host: Arc<Host>,
    input: Arc<Input>,
    output: Output,
}

impl Context {
    pub fn new(host: Arc<Host>, input: Arc<Input>, output: Output) -> Self {
        Self {
            host,
            input,
            output,
        }
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn output(&self) -> &Output {
        &self.output
    }
}
