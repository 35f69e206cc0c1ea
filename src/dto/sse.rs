use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::common::{SessionSummary, TeamSummary};

#[derive(Clone, Debug, PartialEq, Eq)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name; `None` sends a plain message.
    pub event: Option<String>,
    /// Serialized payload.
    pub data: String,
}

impl ServerEvent {
    /// Wrap an already serialized payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`public` or `admin`).
    pub stream: String,
    /// Greeting shown by clients.
    pub message: String,
    /// Whether the backend is running without a quiz store.
    pub degraded: bool,
    /// Admin token, only on the admin stream. Send it back as `X-Admin-Token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the backend is running without a quiz store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// A team was created or its score or player count moved.
pub struct TeamChangedEvent {
    /// Team after the change.
    pub team: TeamSummary,
}

/// A team was removed; its players were logged out.
#[derive(Debug, Serialize, ToSchema)]
pub struct TeamDeletedEvent {
    /// Identifier of the removed team.
    pub team_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// A session was scheduled, started, completed or received a submission.
pub struct SessionChangedEvent {
    /// Session after the change.
    pub session: SessionSummary,
}

/// A session was deleted before anyone submitted to it.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionDeletedEvent {
    /// Identifier of the deleted session.
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the relay missed events; clients should refetch the leaderboard.
pub struct ResyncEvent {
    /// Number of change events the relay dropped.
    pub skipped: u64,
}
