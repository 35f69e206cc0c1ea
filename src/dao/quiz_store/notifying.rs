//! Write-through decorator feeding the change bus.

use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            PlayerEntity, RecordedSubmission, SessionEntity, SessionQuery, SessionStatus,
            SubmissionEntity, SubmissionQuery, TeamEntity,
        },
        quiz_store::QuizStore,
        storage::StorageResult,
    },
    state::bus::{ChangeEvent, EventBus, Row},
};

/// Store decorator publishing a change event after every successful write.
///
/// Reads pass straight through. Events are only emitted once the inner store
/// has committed, so subscribers never observe a write that was rolled back.
#[derive(Clone)]
pub struct NotifyingStore {
    inner: Arc<dyn QuizStore>,
    bus: Arc<EventBus>,
}

impl NotifyingStore {
    /// Wrap `inner`, publishing onto `bus`.
    pub fn new(inner: Arc<dyn QuizStore>, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }

    /// Await `write`, then publish the events derived from its output.
    fn publish_after<T, F>(
        &self,
        write: BoxFuture<'static, StorageResult<T>>,
        events: F,
    ) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&T) -> Vec<ChangeEvent> + Send + 'static,
    {
        let bus = self.bus.clone();
        Box::pin(async move {
            let value = write.await?;
            for event in events(&value) {
                bus.publish(event);
            }
            Ok(value)
        })
    }
}

impl QuizStore for NotifyingStore {
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.publish_after(self.inner.insert_session(session), |session| {
            vec![ChangeEvent::insert(Row::Session(session.clone()))]
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session(id)
    }

    fn find_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.inner.find_sessions(query)
    }

    fn transition_session(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.publish_after(
            self.inner.transition_session(id, from, to, at),
            |session| vec![ChangeEvent::update(Row::Session(session.clone()))],
        )
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.publish_after(self.inner.delete_session(id), |removed| {
            removed
                .iter()
                .map(|session| ChangeEvent::delete(Row::Session(session.clone())))
                .collect()
        })
    }

    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.publish_after(self.inner.insert_team(team), |team| {
            vec![ChangeEvent::insert(Row::Team(team.clone()))]
        })
    }

    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.inner.find_team(id)
    }

    fn find_team_by_name(
        &self,
        shard: String,
        name: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.inner.find_team_by_name(shard, name)
    }

    fn list_teams(&self, shard: String) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        self.inner.list_teams(shard)
    }

    fn increment_team_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.publish_after(self.inner.increment_team_score(id, delta), |team| {
            vec![ChangeEvent::update(Row::Team(team.clone()))]
        })
    }

    fn increment_player_count(
        &self,
        id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        self.publish_after(self.inner.increment_player_count(id, delta), |team| {
            vec![ChangeEvent::update(Row::Team(team.clone()))]
        })
    }

    fn delete_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        self.publish_after(self.inner.delete_team(id), |removed| {
            removed
                .iter()
                .map(|team| ChangeEvent::delete(Row::Team(team.clone())))
                .collect()
        })
    }

    fn insert_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.publish_after(self.inner.insert_player(player), |player| {
            vec![ChangeEvent::insert(Row::Player(player.clone()))]
        })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        self.inner.find_player(id)
    }

    fn record_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<RecordedSubmission>> {
        self.publish_after(self.inner.record_submission(submission), |recorded| {
            vec![
                ChangeEvent::insert(Row::Submission(recorded.submission.clone())),
                ChangeEvent::update(Row::Team(recorded.team.clone())),
                ChangeEvent::update(Row::Session(recorded.session.clone())),
            ]
        })
    }

    fn find_submission(
        &self,
        player_id: Uuid,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        self.inner.find_submission(player_id, session_id)
    }

    fn list_submissions(
        &self,
        query: SubmissionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        self.inner.list_submissions(query)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{quiz_store::memory::MemoryQuizStore, storage::StorageError},
        state::bus::{Delivery, Table},
    };

    #[tokio::test]
    async fn successful_writes_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let store = NotifyingStore::new(Arc::new(MemoryQuizStore::new()), bus.clone());
        let mut teams = bus.subscribe(Table::Teams, None);

        let team = store
            .insert_team(TeamEntity::new("main".into(), "owls".into()))
            .await
            .unwrap();
        let bumped = store.increment_player_count(team.id, 1).await.unwrap();

        assert_eq!(
            teams.recv().await,
            Some(Delivery::Event(ChangeEvent::insert(Row::Team(team))))
        );
        assert_eq!(
            teams.recv().await,
            Some(Delivery::Event(ChangeEvent::update(Row::Team(bumped))))
        );
    }

    #[tokio::test]
    async fn failed_writes_publish_nothing() {
        let bus = Arc::new(EventBus::new(16));
        let store = NotifyingStore::new(Arc::new(MemoryQuizStore::new()), bus.clone());
        let mut teams = bus.subscribe(Table::Teams, None);

        let err = store
            .increment_team_score(Uuid::new_v4(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Missing { entity: "team", .. }));

        store
            .insert_team(TeamEntity::new("main".into(), "owls".into()))
            .await
            .unwrap();
        assert!(matches!(
            teams.recv().await,
            Some(Delivery::Event(ChangeEvent {
                kind: crate::state::bus::ChangeKind::Insert,
                ..
            }))
        ));
    }
}
