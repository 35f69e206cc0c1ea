use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};
use utoipa::ToSchema;
use uuid::Uuid;

/// Number of categories every session is built from.
pub const CATEGORIES_PER_SESSION: usize = 4;
/// Number of words drawn from each category for a grid.
pub const WORDS_PER_CATEGORY: usize = 4;

/// Lifecycle status of a quiz session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by an admin, not yet playable.
    Scheduled,
    /// Open for play; at most one per shard.
    Active,
    /// Closed; terminal.
    Completed,
}

impl SessionStatus {
    /// Stored string representation, also used in database filters.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    /// Position along the forward-only lifecycle.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Scheduled => 0,
            SessionStatus::Active => 1,
            SessionStatus::Completed => 2,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timed quiz session tied to four categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Stable identifier for the session.
    pub id: Uuid,
    /// Partition key of the game instance running this session.
    pub shard: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Planned start time chosen by the admin.
    pub start_time: SystemTime,
    /// Moment the session actually became active.
    pub started_at: Option<SystemTime>,
    /// Moment the session was completed.
    pub end_time: Option<SystemTime>,
    /// The four categories the grid is drawn from.
    pub categories: Vec<String>,
    /// Countdown granted to each player attempt, in seconds.
    pub window_secs: u32,
    /// Number of accepted submissions referencing this session.
    pub submission_count: u32,
}

impl SessionEntity {
    /// Build a freshly scheduled session.
    pub fn scheduled(
        shard: String,
        start_time: SystemTime,
        categories: Vec<String>,
        window_secs: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard,
            status: SessionStatus::Scheduled,
            start_time,
            started_at: None,
            end_time: None,
            categories,
            window_secs,
            submission_count: 0,
        }
    }
}

/// Team competing within a shard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamEntity {
    /// Stable identifier for the team.
    pub id: Uuid,
    /// Partition key the team plays in.
    pub shard: String,
    /// Display name, unique within the shard.
    pub name: String,
    /// Accumulated score; never decreases.
    pub score: i64,
    /// Number of players who joined the team.
    pub player_count: u32,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl TeamEntity {
    /// Build a new empty team.
    pub fn new(shard: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard,
            name,
            score: 0,
            player_count: 0,
            created_at: SystemTime::now(),
        }
    }
}

/// Player registered at join time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier for the player.
    pub id: Uuid,
    /// Display name chosen at join.
    pub name: String,
    /// Team the player belongs to.
    pub team_id: Uuid,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl PlayerEntity {
    /// Build a new player bound to `team_id`.
    pub fn new(name: String, team_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            team_id,
            created_at: SystemTime::now(),
        }
    }
}

/// Append-only record of one player's final result for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionEntity {
    /// Stable identifier for the submission.
    pub id: Uuid,
    /// Submitting player.
    pub player_id: Uuid,
    /// Team credited with the score.
    pub team_id: Uuid,
    /// Session the attempt belongs to.
    pub session_id: Uuid,
    /// Whether every category was solved.
    pub is_correct: bool,
    /// Points credited to the team.
    pub score: i64,
    /// Time the submission was written.
    pub submitted_at: SystemTime,
}

/// Outcome of an accepted submission: the stored row and the credited team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubmission {
    /// The inserted submission.
    pub submission: SubmissionEntity,
    /// Team row after the score increment.
    pub team: TeamEntity,
    /// Session row after its submission counter moved.
    pub session: SessionEntity,
}

/// Sort order for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionOrder {
    /// Oldest planned start first.
    StartAsc,
    /// Newest planned start first.
    #[default]
    StartDesc,
}

/// Equality/order/limit filter for session reads.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    /// Restrict to one shard.
    pub shard: Option<String>,
    /// Restrict to one status.
    pub status: Option<SessionStatus>,
    /// Ordering on `start_time`.
    pub order: SessionOrder,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Sessions of `shard` with the given status.
    pub fn in_shard(shard: &str, status: SessionStatus) -> Self {
        Self {
            shard: Some(shard.to_owned()),
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply a sort order.
    pub fn order(mut self, order: SessionOrder) -> Self {
        self.order = order;
        self
    }

    /// Apply a row limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `session` passes the equality filters.
    pub fn matches(&self, session: &SessionEntity) -> bool {
        self.shard.as_deref().is_none_or(|s| s == session.shard)
            && self.status.is_none_or(|s| s == session.status)
    }
}

/// Equality filter for submission reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmissionQuery {
    /// Restrict to one session.
    pub session_id: Option<Uuid>,
    /// Restrict to one team.
    pub team_id: Option<Uuid>,
}

impl SubmissionQuery {
    /// Whether `submission` passes the equality filters.
    pub fn matches(&self, submission: &SubmissionEntity) -> bool {
        self.session_id.is_none_or(|id| id == submission.session_id)
            && self.team_id.is_none_or(|id| id == submission.team_id)
    }
}

/// One cell of a player's word grid, materialised per attempt and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct WordGridItem {
    /// Identifier unique across the whole word bank.
    pub id: u32,
    /// Displayed word.
    pub text: String,
    /// Category the word belongs to.
    pub category: String,
}
