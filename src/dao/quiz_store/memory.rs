//! In-process store used for single-node deployments and tests.
//!
//! All tables live behind one lock so every trait operation is linearizable,
//! which gives the same guarantees the MongoDB backend gets from conditional
//! updates, unique indexes and transactions.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dao::{
    models::{
        PlayerEntity, RecordedSubmission, SessionEntity, SessionOrder, SessionQuery,
        SessionStatus, SubmissionEntity, SubmissionQuery, TeamEntity,
    },
    quiz_store::QuizStore,
    storage::{Conflict, StorageError, StorageResult},
};

/// Failure reported while the store is switched offline.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// Switched off with [`MemoryQuizStore::set_online`].
    #[error("in-memory store is offline")]
    Offline,
}

#[derive(Default)]
struct Tables {
    sessions: IndexMap<Uuid, SessionEntity>,
    teams: IndexMap<Uuid, TeamEntity>,
    players: HashMap<Uuid, PlayerEntity>,
    submissions: IndexMap<Uuid, SubmissionEntity>,
    submission_keys: HashSet<(Uuid, Uuid)>,
}

/// Lock-protected tables implementing [`QuizStore`].
#[derive(Clone, Default)]
pub struct MemoryQuizStore {
    tables: Arc<Mutex<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryQuizStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while offline every operation fails as unavailable.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "memory store offline".into(),
                MemoryStoreError::Offline,
            ))
        } else {
            Ok(())
        }
    }

    /// Run `op` against the locked tables once the store is confirmed online.
    fn with_tables<T, F>(&self, op: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online()?;
            let mut tables = store.tables.lock().await;
            op(&mut tables)
        })
    }
}

fn sorted_sessions(tables: &Tables, query: &SessionQuery) -> Vec<SessionEntity> {
    let mut sessions: Vec<SessionEntity> = tables
        .sessions
        .values()
        .filter(|session| query.matches(session))
        .cloned()
        .collect();
    match query.order {
        SessionOrder::StartAsc => sessions.sort_by_key(|session| session.start_time),
        SessionOrder::StartDesc => {
            sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        }
    }
    if let Some(limit) = query.limit {
        sessions.truncate(limit);
    }
    sessions
}

fn transition(
    tables: &mut Tables,
    id: Uuid,
    from: SessionStatus,
    to: SessionStatus,
    at: SystemTime,
) -> StorageResult<SessionEntity> {
    let current = tables
        .sessions
        .get(&id)
        .ok_or(StorageError::missing("session", id))?;

    if current.status != from {
        return Err(Conflict::StatusMismatch {
            session_id: id,
            expected: from,
            actual: current.status,
        }
        .into());
    }

    if to == SessionStatus::Active {
        let shard = current.shard.clone();
        if let Some(active) = tables
            .sessions
            .values()
            .find(|s| s.id != id && s.shard == shard && s.status == SessionStatus::Active)
        {
            return Err(Conflict::ActiveSessionExists {
                shard,
                active_id: Some(active.id),
            }
            .into());
        }
    }

    let session = tables
        .sessions
        .get_mut(&id)
        .ok_or(StorageError::missing("session", id))?;
    session.status = to;
    match to {
        SessionStatus::Active => session.started_at = Some(at),
        SessionStatus::Completed => session.end_time = Some(at),
        SessionStatus::Scheduled => {}
    }
    Ok(session.clone())
}

fn record(tables: &mut Tables, submission: SubmissionEntity) -> StorageResult<RecordedSubmission> {
    let session = tables
        .sessions
        .get(&submission.session_id)
        .ok_or(StorageError::missing("session", submission.session_id))?;
    if session.status != SessionStatus::Active {
        return Err(Conflict::SessionNotActive {
            session_id: session.id,
            status: session.status,
        }
        .into());
    }

    let key = (submission.player_id, submission.session_id);
    if tables.submission_keys.contains(&key) {
        return Err(Conflict::DuplicateSubmission {
            player_id: submission.player_id,
            session_id: submission.session_id,
        }
        .into());
    }

    if !tables.teams.contains_key(&submission.team_id) {
        return Err(StorageError::missing("team", submission.team_id));
    }

    tables.submission_keys.insert(key);
    tables.submissions.insert(submission.id, submission.clone());

    let team = tables
        .teams
        .get_mut(&submission.team_id)
        .ok_or(StorageError::missing("team", submission.team_id))?;
    team.score += submission.score;
    let team = team.clone();

    let session = tables
        .sessions
        .get_mut(&submission.session_id)
        .ok_or(StorageError::missing("session", submission.session_id))?;
    session.submission_count += 1;
    let session = session.clone();

    Ok(RecordedSubmission {
        submission,
        team,
        session,
    })
}

impl QuizStore for MemoryQuizStore {
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.with_tables(move |tables| {
            tables.sessions.insert(session.id, session.clone());
            Ok(session)
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.with_tables(move |tables| Ok(tables.sessions.get(&id).cloned()))
    }

    fn find_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.with_tables(move |tables| Ok(sorted_sessions(tables, &query)))
    }

    fn transition_session(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.with_tables(move |tables| transition(tables, id, from, to, at))
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.with_tables(move |tables| {
            let Some(session) = tables.sessions.get(&id) else {
                return Ok(None);
            };
            if session.submission_count > 0 {
                return Err(Conflict::SessionReferenced {
                    session_id: id,
                    submissions: session.submission_count,
                }
                .into());
            }
            Ok(tables.sessions.shift_remove(&id))
        })
    }

    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.with_tables(move |tables| {
            if tables
                .teams
                .values()
                .any(|existing| existing.shard == team.shard && existing.name == team.name)
            {
                return Err(Conflict::DuplicateTeamName {
                    shard: team.shard,
                    name: team.name,
                }
                .into());
            }
            tables.teams.insert(team.id, team.clone());
            Ok(team)
        })
    }

    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.with_tables(move |tables| Ok(tables.teams.get(&id).cloned()))
    }

    fn find_team_by_name(
        &self,
        shard: String,
        name: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .teams
                .values()
                .find(|team| team.shard == shard && team.name == name)
                .cloned())
        })
    }

    fn list_teams(&self, shard: String) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        self.with_tables(move |tables| {
            let mut teams: Vec<TeamEntity> = tables
                .teams
                .values()
                .filter(|team| team.shard == shard)
                .cloned()
                .collect();
            // Stable sort keeps insertion order between equal scores.
            teams.sort_by(|a, b| b.score.cmp(&a.score));
            Ok(teams)
        })
    }

    fn increment_team_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.with_tables(move |tables| {
            let team = tables
                .teams
                .get_mut(&id)
                .ok_or(StorageError::missing("team", id))?;
            team.score += delta;
            Ok(team.clone())
        })
    }

    fn increment_player_count(
        &self,
        id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.with_tables(move |tables| {
            let team = tables
                .teams
                .get_mut(&id)
                .ok_or(StorageError::missing("team", id))?;
            team.player_count += delta;
            Ok(team.clone())
        })
    }

    fn delete_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.with_tables(move |tables| Ok(tables.teams.shift_remove(&id)))
    }

    fn insert_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.with_tables(move |tables| {
            if !tables.teams.contains_key(&player.team_id) {
                return Err(StorageError::missing("team", player.team_id));
            }
            tables.players.insert(player.id, player.clone());
            Ok(player)
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        self.with_tables(move |tables| Ok(tables.players.get(&id).cloned()))
    }

    fn record_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<RecordedSubmission>> {
        self.with_tables(move |tables| record(tables, submission))
    }

    fn find_submission(
        &self,
        player_id: Uuid,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .submissions
                .values()
                .find(|s| s.player_id == player_id && s.session_id == session_id)
                .cloned())
        })
    }

    fn list_submissions(
        &self,
        query: SubmissionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .submissions
                .values()
                .filter(|s| query.matches(s))
                .cloned()
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(shard: &str) -> SessionEntity {
        SessionEntity::scheduled(
            shard.into(),
            SystemTime::now(),
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            60,
        )
    }

    fn submission(player_id: Uuid, team_id: Uuid, session_id: Uuid, score: i64) -> SubmissionEntity {
        SubmissionEntity {
            id: Uuid::new_v4(),
            player_id,
            team_id,
            session_id,
            is_correct: true,
            score,
            submitted_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn transition_requires_expected_prior_status() {
        let store = MemoryQuizStore::new();
        let s = store.insert_session(session("lab")).await.unwrap();

        let err = store
            .transition_session(s.id, SessionStatus::Active, SessionStatus::Completed, SystemTime::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict(Conflict::StatusMismatch {
                actual: SessionStatus::Scheduled,
                ..
            })
        ));

        let active = store
            .transition_session(s.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert!(active.started_at.is_some());
    }

    #[tokio::test]
    async fn only_one_active_session_per_shard() {
        let store = MemoryQuizStore::new();
        let first = store.insert_session(session("lab")).await.unwrap();
        let second = store.insert_session(session("lab")).await.unwrap();
        let other_shard = store.insert_session(session("annex")).await.unwrap();

        store
            .transition_session(first.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
        let err = store
            .transition_session(second.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict(Conflict::ActiveSessionExists { active_id, .. }) if active_id == Some(first.id)
        ));

        store
            .transition_session(other_shard.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn record_submission_is_unique_and_credits_once() {
        let store = MemoryQuizStore::new();
        let team = store.insert_team(TeamEntity::new("lab".into(), "owls".into())).await.unwrap();
        let s = store.insert_session(session("lab")).await.unwrap();
        store
            .transition_session(s.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
        let player = Uuid::new_v4();

        let recorded = store.record_submission(submission(player, team.id, s.id, 700)).await.unwrap();
        assert_eq!(recorded.team.score, 700);
        assert_eq!(recorded.session.submission_count, 1);

        let err = store
            .record_submission(submission(player, team.id, s.id, 700))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(Conflict::DuplicateSubmission { .. })));
        assert_eq!(store.find_team(team.id).await.unwrap().unwrap().score, 700);
    }

    #[tokio::test]
    async fn late_submission_is_rejected_without_scoring() {
        let store = MemoryQuizStore::new();
        let team = store.insert_team(TeamEntity::new("lab".into(), "owls".into())).await.unwrap();
        let s = store.insert_session(session("lab")).await.unwrap();
        store
            .transition_session(s.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
        store
            .transition_session(s.id, SessionStatus::Active, SessionStatus::Completed, SystemTime::now())
            .await
            .unwrap();

        let err = store
            .record_submission(submission(Uuid::new_v4(), team.id, s.id, 500))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict(Conflict::SessionNotActive {
                status: SessionStatus::Completed,
                ..
            })
        ));
        assert_eq!(store.find_team(team.id).await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn referenced_session_cannot_be_deleted() {
        let store = MemoryQuizStore::new();
        let team = store.insert_team(TeamEntity::new("lab".into(), "owls".into())).await.unwrap();
        let s = store.insert_session(session("lab")).await.unwrap();
        store
            .transition_session(s.id, SessionStatus::Scheduled, SessionStatus::Active, SystemTime::now())
            .await
            .unwrap();
        store
            .record_submission(submission(Uuid::new_v4(), team.id, s.id, 10))
            .await
            .unwrap();

        let err = store.delete_session(s.id).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict(Conflict::SessionReferenced { submissions: 1, .. })
        ));

        let unused = store.insert_session(session("lab")).await.unwrap();
        assert!(store.delete_session(unused.id).await.unwrap().is_some());
        assert!(store.delete_session(unused.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_team_names_are_scoped_to_the_shard() {
        let store = MemoryQuizStore::new();
        store.insert_team(TeamEntity::new("lab".into(), "owls".into())).await.unwrap();
        let err = store
            .insert_team(TeamEntity::new("lab".into(), "owls".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(Conflict::DuplicateTeamName { .. })));
        store.insert_team(TeamEntity::new("annex".into(), "owls".into())).await.unwrap();
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryQuizStore::new();
        store.set_online(false);
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Unavailable { .. })
        ));
        store.set_online(true);
        assert!(store.health_check().await.is_ok());
    }
}
