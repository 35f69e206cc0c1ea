pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod notifying;

use std::time::SystemTime;

use crate::dao::models::{
    PlayerEntity, RecordedSubmission, SessionEntity, SessionQuery, SessionStatus,
    SubmissionEntity, SubmissionQuery, TeamEntity,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the transactional store holding sessions, teams, players and submissions.
///
/// Every write that must stay consistent under concurrent writers is a single
/// store operation: status changes are conditional on the prior status, score
/// changes are server-side increments, and submission recording checks the
/// session status and the (player, session) uniqueness in the same unit.
pub trait QuizStore: Send + Sync {
    /// Insert a scheduled session.
    fn insert_session(&self, session: SessionEntity)
    -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Fetch a session by identifier.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Sessions matching `query`, in the requested order.
    fn find_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Move a session from `from` to `to` only if it is still in `from`.
    ///
    /// Activation additionally fails when another session of the shard is active.
    /// `at` stamps `started_at` (activation) or `end_time` (completion).
    fn transition_session(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Delete a session that no submission references. Returns the removed row.
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;

    /// Insert a team, rejecting duplicate names within the shard.
    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<TeamEntity>>;
    /// Fetch a team by identifier.
    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;
    /// Fetch a team by its exact name within `shard`.
    fn find_team_by_name(
        &self,
        shard: String,
        name: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;
    /// Teams of a shard ordered by score descending, then creation order.
    fn list_teams(&self, shard: String) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>>;
    /// Atomically add `delta` to the team score and return the updated row.
    fn increment_team_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>>;
    /// Atomically add `delta` to the team player count and return the updated row.
    fn increment_player_count(
        &self,
        id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>>;
    /// Delete a team. Returns the removed row.
    fn delete_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;

    /// Insert a player; the caller bumps the team player count.
    fn insert_player(&self, player: PlayerEntity)
    -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Fetch a player by identifier.
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// Record a submission and credit its score as one atomic unit.
    fn record_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<RecordedSubmission>>;
    /// The submission of `player_id` for `session_id`, if any.
    fn find_submission(
        &self,
        player_id: Uuid,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>>;
    /// Submissions matching `query`.
    fn list_submissions(
        &self,
        query: SubmissionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>>;

    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the backend connection after health checks failed.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
