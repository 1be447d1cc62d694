//! Connection slot state machine.
//!
//! ```text
//! Idle ──start──▶ Running ──finish──▶ Idle
//!                    │
//!                  fault
//!                    ▼
//!                 Faulted ──replace──▶ Idle (new connection)
//! ```
//!
//! An idle slot whose connection fails a health check may also fault.

use crate::error::{Error, Result};

/// Lifecycle state of one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SlotState {
    /// Waiting for work with a usable connection.
    #[default]
    Idle = 0,
    /// Executing exactly one query.
    Running = 1,
    /// Connection invalidated; must be replaced before the next query.
    Faulted = 2,
}

/// Transition trigger for [`SlotState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Start,
    Finish,
    Fault,
    Replace,
}

impl SlotState {
    /// Apply `event`, rejecting transitions the lifecycle does not allow.
    pub fn on(self, event: SlotEvent) -> Result<SlotState> {
        match (self, event) {
            (SlotState::Idle, SlotEvent::Start) => Ok(SlotState::Running),
            (SlotState::Running, SlotEvent::Finish) => Ok(SlotState::Idle),
            (SlotState::Running | SlotState::Idle, SlotEvent::Fault) => Ok(SlotState::Faulted),
            (SlotState::Faulted, SlotEvent::Replace) => Ok(SlotState::Idle),
            (state, event) => Err(Error::InvalidUsage(format!(
                "invalid slot transition: {:?} on {:?}",
                event, state
            ))),
        }
    }

    /// Decode from the `repr(u8)` value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SlotState::Idle),
            1 => Some(SlotState::Running),
            2 => Some(SlotState::Faulted),
            _ => None,
        }
    }
}
