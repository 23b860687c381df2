//! Run-level abort flag

use tokio::sync::watch;

/// Owner side: raises the abort for every clone of its signal
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side, checked between operations and raced against commands
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the abort is raised; pends forever otherwise
    pub async fn aborted(&self) {
        let Some(mut rx) = self.rx.clone() else {
            return std::future::pending().await;
        };
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            // handle dropped without aborting
            std::future::pending::<()>().await;
        }
    }
}
