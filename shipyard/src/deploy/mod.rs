//! Release lifecycle: lock, release bookkeeping, state machine and recipe

pub mod fsm;
pub mod lock;
pub mod recipe;
pub mod release;
