//! Forward-only session lifecycle rules.

use thiserror::Error;

use crate::dao::models::SessionStatus;

/// Lifecycle events an admin or the scheduler can apply to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Open the session for play.
    Start,
    /// Close the session.
    End,
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// Event that cannot be applied from this status.
    pub event: SessionEvent,
}

/// Validated transition, ready to be applied as a conditional store update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Prior status the store update is gated on.
    pub from: SessionStatus,
    /// Status written by the update.
    pub to: SessionStatus,
}

/// Compute the status reached by applying `event` from `from`.
///
/// The lifecycle only moves forward: `scheduled -> active -> completed`.
pub fn compute_transition(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<Transition, InvalidTransition> {
    let to = match (from, event) {
        (SessionStatus::Scheduled, SessionEvent::Start) => SessionStatus::Active,
        (SessionStatus::Active, SessionEvent::End) => SessionStatus::Completed,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(Transition { from, to })
}

/// Whether an observed status may replace a cached one without moving backwards.
pub fn is_forward(cached: SessionStatus, observed: SessionStatus) -> bool {
    observed.rank() >= cached.rank()
}
