//! Finite State Machine for the release lifecycle

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ShipyardError;
use crate::runtime::Runtime;

/// Config key holding a host's lifecycle record
pub const LIFECYCLE_KEY: &str = "lifecycle";

/// Release state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Nothing done yet in this run
    #[default]
    Idle,

    /// Deploy directories exist
    Setup,

    /// Deploy lock held
    Locked,

    /// Release directory allocated
    #[serde(rename = "release_dir_created")]
    ReleaseCreated,

    /// Code checked out into the release
    CodeUpdated,

    /// Shared paths linked
    SharedLinked,

    /// Writable paths prepared
    WritableSet,

    /// `current` points at the new release
    Symlinked,

    /// Deploy lock released
    Unlocked,

    /// Old releases removed
    Cleaned,

    /// `current` moved back to the previous release
    RolledBack,

    /// Something went wrong
    Failed,
}

/// Release event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseEvent {
    Setup,
    Lock,
    CreateRelease,
    UpdateCode,
    LinkShared,
    SetWritable,
    Symlink,
    Unlock,
    Cleanup,
    Rollback,
    Fail(String),
}

/// Release FSM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFsm {
    state: ReleaseState,
    error: Option<String>,
    rolled_back: bool,
}

impl ReleaseFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReleaseState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether this run moved `current` back
    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// State `event` leads to, without changing anything
    pub fn next_state(&self, event: &ReleaseEvent) -> Result<ReleaseState, ShipyardError> {
        use ReleaseEvent as E;
        use ReleaseState as S;

        let next = match (&self.state, event) {
            (_, E::Fail(_)) => S::Failed,

            // Forward path
            (S::Idle | S::Setup, E::Setup) => S::Setup,
            (S::Setup, E::Lock) => S::Locked,
            (S::Locked, E::CreateRelease) => S::ReleaseCreated,
            (S::ReleaseCreated, E::UpdateCode) => S::CodeUpdated,
            (S::CodeUpdated, E::LinkShared) => S::SharedLinked,
            (S::SharedLinked, E::SetWritable) => S::WritableSet,
            (S::WritableSet, E::Symlink) => S::Symlinked,
            (S::Symlinked, E::Unlock) => S::Unlocked,
            (S::Unlocked, E::Cleanup) => S::Cleaned,

            // Rollback path
            (S::Idle, E::Lock) => S::Locked,
            (S::Locked, E::Rollback) => S::RolledBack,
            (S::RolledBack, E::Unlock) => S::Unlocked,

            // Invalid transitions
            (state, event) => {
                return Err(ShipyardError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };
        Ok(next)
    }

    pub fn accepts(&self, event: &ReleaseEvent) -> bool {
        self.next_state(event).is_ok()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseEvent) -> Result<(), ShipyardError> {
        let next = self.next_state(&event)?;
        match event {
            ReleaseEvent::Fail(reason) => self.error = Some(reason),
            ReleaseEvent::Rollback => self.rolled_back = true,
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    // ============================ HOST CONFIG ================================ //

    /// Record stored in the master for `alias`, if any
    pub fn stored(rt: &Runtime, alias: &str) -> Option<Self> {
        match rt.peek(alias, LIFECYCLE_KEY)? {
            Value::Null => None,
            value => serde_json::from_value(value).ok(),
        }
    }

    /// Record of the current host, idle when none was stored yet
    pub async fn load(rt: &Runtime) -> Result<Self, ShipyardError> {
        match rt.get_or(LIFECYCLE_KEY, Value::Null).await? {
            Value::Null => Ok(Self::new()),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    pub fn save(&self, rt: &Runtime) -> Result<(), ShipyardError> {
        rt.set(LIFECYCLE_KEY, serde_json::to_value(self)?)
    }

    /// Apply `event` to the current host's record
    pub async fn advance(rt: &Runtime, event: ReleaseEvent) -> Result<Self, ShipyardError> {
        let mut fsm = Self::load(rt).await?;
        fsm.process(event)?;
        fsm.save(rt)?;
        Ok(fsm)
    }

    /// Run `action` if `event` is allowed now, then record the transition.
    ///
    /// A failing action leaves the record untouched.
    pub async fn step<T, Fut>(rt: &Runtime, event: ReleaseEvent, action: Fut) -> Result<T, ShipyardError>
    where
        Fut: Future<Output = Result<T, ShipyardError>>,
    {
        let mut fsm = Self::load(rt).await?;
        fsm.next_state(&event)?;
        let output = action.await?;
        fsm.process(event)?;
        fsm.save(rt)?;
        Ok(output)
    }
}
