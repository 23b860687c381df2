mod test_context;
mod test_coordinator;
mod test_fsm;
mod test_lifecycle;
mod test_lock;

mod support;
