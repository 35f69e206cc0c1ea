use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionStatus, TeamEntity},
    dto::format_system_time,
};

/// Session projection shared by REST responses, SSE events and player views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: Uuid,
    /// Partition the session belongs to.
    pub shard: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Planned start (RFC 3339).
    pub start_time: String,
    /// Actual start (RFC 3339), once active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Completion time (RFC 3339), once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// The four categories the grid is drawn from.
    pub categories: Vec<String>,
    /// Time each player gets to solve the grid.
    pub window_secs: u32,
    /// Submissions recorded so far.
    pub submission_count: u32,
}

impl From<&SessionEntity> for SessionSummary {
    fn from(session: &SessionEntity) -> Self {
        Self {
            id: session.id,
            shard: session.shard.clone(),
            status: session.status,
            start_time: format_system_time(session.start_time),
            started_at: session.started_at.map(format_system_time),
            end_time: session.end_time.map(format_system_time),
            categories: session.categories.clone(),
            window_secs: session.window_secs,
            submission_count: session.submission_count,
        }
    }
}

/// Team projection used on leaderboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamSummary {
    /// Team identifier.
    pub id: Uuid,
    /// Display name, unique within the shard.
    pub name: String,
    /// Cumulative score across sessions.
    pub score: i64,
    /// Players who joined the team.
    pub player_count: u32,
}

impl From<&TeamEntity> for TeamSummary {
    fn from(team: &TeamEntity) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            score: team.score,
            player_count: team.player_count,
        }
    }
}
