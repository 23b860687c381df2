//! Server state

use std::sync::Arc;

use crate::coordinator::master::Master;

/// Server state shared across handlers
pub struct ServerState {
    pub master: Arc<Master>,
}

impl ServerState {
    pub fn new(master: Arc<Master>) -> Self {
        Self { master }
    }
}
