//! FSM unit tests

use shipyard::deploy::fsm::{ReleaseEvent, ReleaseFsm, ReleaseState};
use shipyard::errors::ShipyardError;

#[test]
fn test_fsm_initial_state() {
    let fsm = ReleaseFsm::new();
    assert_eq!(fsm.state(), ReleaseState::Idle);
    assert!(fsm.error().is_none());
    assert!(!fsm.rolled_back());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = ReleaseFsm::new();

    let flow = [
        (ReleaseEvent::Setup, ReleaseState::Setup),
        (ReleaseEvent::Lock, ReleaseState::Locked),
        (ReleaseEvent::CreateRelease, ReleaseState::ReleaseCreated),
        (ReleaseEvent::UpdateCode, ReleaseState::CodeUpdated),
        (ReleaseEvent::LinkShared, ReleaseState::SharedLinked),
        (ReleaseEvent::SetWritable, ReleaseState::WritableSet),
        (ReleaseEvent::Symlink, ReleaseState::Symlinked),
        (ReleaseEvent::Unlock, ReleaseState::Unlocked),
        (ReleaseEvent::Cleanup, ReleaseState::Cleaned),
    ];
    for (event, expected) in flow {
        fsm.process(event).unwrap();
        assert_eq!(fsm.state(), expected);
    }
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_deploy_failure_flow() {
    let mut fsm = ReleaseFsm::new();

    fsm.process(ReleaseEvent::Setup).unwrap();
    fsm.process(ReleaseEvent::Lock).unwrap();
    fsm.process(ReleaseEvent::Fail("git clone failed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), ReleaseState::Failed);
    assert_eq!(fsm.error(), Some("git clone failed"));
}

#[test]
fn test_fsm_rollback_flow() {
    let mut fsm = ReleaseFsm::new();

    fsm.process(ReleaseEvent::Lock).unwrap();
    fsm.process(ReleaseEvent::Rollback).unwrap();
    assert_eq!(fsm.state(), ReleaseState::RolledBack);
    assert!(fsm.rolled_back());

    fsm.process(ReleaseEvent::Unlock).unwrap();
    assert_eq!(fsm.state(), ReleaseState::Unlocked);
    assert!(fsm.rolled_back());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = ReleaseFsm::new();

    // symlinking before a release exists
    let result = fsm.process(ReleaseEvent::Symlink);
    assert!(matches!(result, Err(ShipyardError::InvalidTransition(_))));
    assert_eq!(fsm.state(), ReleaseState::Idle);

    fsm.process(ReleaseEvent::Setup).unwrap();
    assert!(!fsm.accepts(&ReleaseEvent::Rollback));
    assert!(!fsm.accepts(&ReleaseEvent::Unlock));
    assert!(fsm.accepts(&ReleaseEvent::Fail("boom".to_string())));
}

#[test]
fn test_fsm_serialization() {
    let mut fsm = ReleaseFsm::new();
    fsm.process(ReleaseEvent::Setup).unwrap();
    fsm.process(ReleaseEvent::Lock).unwrap();
    fsm.process(ReleaseEvent::CreateRelease).unwrap();

    let value = serde_json::to_value(&fsm).unwrap();
    assert_eq!(value["state"], "release_dir_created");

    let restored: ReleaseFsm = serde_json::from_value(value).unwrap();
    assert_eq!(restored, fsm);
}
