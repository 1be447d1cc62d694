//! Sans-I/O state for query execution.
//!
//! Nothing here performs I/O or spawns threads: the adapter reacts to driver
//! callbacks and the slot state machine validates lifecycle transitions.
//! The pool in [`crate::sync`] drives both.

pub mod adapter;
pub mod slot;

pub use adapter::{ROW_BATCH_SIZE, ResultAdapter};
pub use slot::{SlotEvent, SlotState};
