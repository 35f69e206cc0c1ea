//! MongoDB collections, indexes and the transactional submission write.

use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    error::{
        Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT, WriteFailure,
    },
    options::{IndexOptions, ReturnDocument},
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoPlayerDocument, MongoSessionDocument, MongoSubmissionDocument, MongoTeamDocument,
        PLAYER_COLLECTION, SESSION_COLLECTION, SUBMISSION_COLLECTION, TEAM_COLLECTION, doc_id,
    },
};
use crate::dao::{
    models::{
        PlayerEntity, RecordedSubmission, SessionEntity, SessionOrder, SessionQuery,
        SessionStatus, SubmissionEntity, SubmissionQuery, TeamEntity,
    },
    quiz_store::QuizStore,
    storage::{Conflict, StorageError, StorageResult},
};

const DUPLICATE_KEY: i32 = 11000;
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

/// A labelled driver failure is retried until `MAX_TRANSACTION_ATTEMPTS` tries were made.
fn may_retry(labelled: bool, attempt: u32) -> bool {
    labelled && attempt < MAX_TRANSACTION_ATTEMPTS
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn op_error(collection: &'static str, action: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Operation {
        collection,
        action,
        source,
    }
}

/// MongoDB implementation of [`QuizStore`].
///
/// Identifiers are stored as strings in `_id`. Uniqueness of submissions per
/// (player, session), of team names per shard and of the active session per
/// shard is enforced by indexes; submission recording runs in a transaction.
#[derive(Clone)]
pub struct MongoQuizStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

/// Why one transaction attempt stopped.
enum AttemptError {
    /// The write was refused on its merits; the transaction was aborted.
    Rejected(StorageError),
    /// The driver failed; may carry a transient label.
    Driver {
        step: &'static str,
        source: MongoError,
    },
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoQuizStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let indexes: [(&'static str, &'static str, Document, IndexOptions); 4] = [
            (
                SUBMISSION_COLLECTION,
                "player_session_unique",
                doc! {"player_id": 1, "session_id": 1},
                IndexOptions::builder()
                    .name(Some("player_session_unique".to_owned()))
                    .unique(Some(true))
                    .build(),
            ),
            (
                SESSION_COLLECTION,
                "active_session_per_shard",
                doc! {"shard": 1},
                IndexOptions::builder()
                    .name(Some("active_session_per_shard".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(doc! {"status": SessionStatus::Active.as_str()}))
                    .build(),
            ),
            (
                SESSION_COLLECTION,
                "shard_start_time",
                doc! {"shard": 1, "start_time": 1},
                IndexOptions::builder()
                    .name(Some("shard_start_time".to_owned()))
                    .build(),
            ),
            (
                TEAM_COLLECTION,
                "team_name_per_shard",
                doc! {"shard": 1, "name": 1},
                IndexOptions::builder()
                    .name(Some("team_name_per_shard".to_owned()))
                    .unique(Some(true))
                    .build(),
            ),
        ];

        for (collection, index, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.database().await.collection::<T>(name)
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.collection(SESSION_COLLECTION).await
    }

    async fn teams(&self) -> Collection<MongoTeamDocument> {
        self.collection(TEAM_COLLECTION).await
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.collection(PLAYER_COLLECTION).await
    }

    async fn submissions(&self) -> Collection<MongoSubmissionDocument> {
        self.collection(SUBMISSION_COLLECTION).await
    }

    async fn insert<D, E>(&self, name: &'static str, entity: E) -> StorageResult<E>
    where
        D: Serialize + Send + Sync + From<E>,
        E: Clone + Send,
    {
        let document: D = entity.clone().into();
        self.collection::<D>(name)
            .await
            .insert_one(document)
            .await
            .map_err(op_error(name, "insert document"))?;
        Ok(entity)
    }

    async fn find_session(&self, id: Uuid) -> StorageResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(op_error(SESSION_COLLECTION, "load session"))?;
        Ok(document.map(SessionEntity::try_from).transpose()?)
    }

    async fn find_sessions(&self, query: SessionQuery) -> StorageResult<Vec<SessionEntity>> {
        let mut filter = Document::new();
        if let Some(shard) = &query.shard {
            filter.insert("shard", shard.as_str());
        }
        if let Some(status) = query.status {
            filter.insert("status", status.as_str());
        }
        let direction = match query.order {
            SessionOrder::StartAsc => 1,
            SessionOrder::StartDesc => -1,
        };

        let sessions = self.sessions().await;
        let mut find = sessions
            .find(filter)
            .sort(doc! {"start_time": direction});
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }

        let documents: Vec<MongoSessionDocument> = find
            .await
            .map_err(op_error(SESSION_COLLECTION, "list sessions"))?
            .try_collect()
            .await
            .map_err(op_error(SESSION_COLLECTION, "list sessions"))?;

        Ok(documents
            .into_iter()
            .map(SessionEntity::try_from)
            .collect::<MongoResult<Vec<_>>>()?)
    }

    async fn active_session_in(&self, shard: &str) -> StorageResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! {"shard": shard, "status": SessionStatus::Active.as_str()})
            .await
            .map_err(op_error(SESSION_COLLECTION, "load active session"))?;
        Ok(document.map(SessionEntity::try_from).transpose()?)
    }

    async fn transition_session(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: SystemTime,
    ) -> StorageResult<SessionEntity> {
        let mut set = doc! {"status": to.as_str()};
        match to {
            SessionStatus::Active => {
                set.insert("started_at", DateTime::from_system_time(at));
            }
            SessionStatus::Completed => {
                set.insert("end_time", DateTime::from_system_time(at));
            }
            SessionStatus::Scheduled => {}
        }

        let mut filter = doc_id(id);
        filter.insert("status", from.as_str());

        let updated = self
            .sessions()
            .await
            .find_one_and_update(filter, doc! {"$set": set})
            .return_document(ReturnDocument::After)
            .await;

        match updated {
            Ok(Some(document)) => Ok(SessionEntity::try_from(document)?),
            Ok(None) => {
                let current = self
                    .find_session(id)
                    .await?
                    .ok_or(StorageError::missing("session", id))?;
                Err(Conflict::StatusMismatch {
                    session_id: id,
                    expected: from,
                    actual: current.status,
                }
                .into())
            }
            Err(err) if to == SessionStatus::Active && is_duplicate_key(&err) => {
                let current = self
                    .find_session(id)
                    .await?
                    .ok_or(StorageError::missing("session", id))?;
                let active_id = self
                    .active_session_in(&current.shard)
                    .await?
                    .map(|active| active.id);
                Err(Conflict::ActiveSessionExists {
                    shard: current.shard,
                    active_id,
                }
                .into())
            }
            Err(source) => Err(MongoDaoError::Operation {
                collection: SESSION_COLLECTION,
                action: "transition session",
                source,
            }
            .into()),
        }
    }

    async fn delete_session(&self, id: Uuid) -> StorageResult<Option<SessionEntity>> {
        let mut filter = doc_id(id);
        filter.insert("submission_count", 0);
        let removed = self
            .sessions()
            .await
            .find_one_and_delete(filter)
            .await
            .map_err(op_error(SESSION_COLLECTION, "delete session"))?;

        if let Some(document) = removed {
            return Ok(Some(SessionEntity::try_from(document)?));
        }

        match self.find_session(id).await? {
            None => Ok(None),
            Some(session) => Err(Conflict::SessionReferenced {
                session_id: id,
                submissions: session.submission_count,
            }
            .into()),
        }
    }

    async fn insert_team(&self, team: TeamEntity) -> StorageResult<TeamEntity> {
        let document: MongoTeamDocument = team.clone().into();
        match self.teams().await.insert_one(document).await {
            Ok(_) => Ok(team),
            Err(err) if is_duplicate_key(&err) => Err(Conflict::DuplicateTeamName {
                shard: team.shard,
                name: team.name,
            }
            .into()),
            Err(source) => Err(MongoDaoError::Operation {
                collection: TEAM_COLLECTION,
                action: "insert team",
                source,
            }
            .into()),
        }
    }

    async fn find_team_by(&self, filter: Document) -> StorageResult<Option<TeamEntity>> {
        let document = self
            .teams()
            .await
            .find_one(filter)
            .await
            .map_err(op_error(TEAM_COLLECTION, "load team"))?;
        Ok(document.map(TeamEntity::try_from).transpose()?)
    }

    async fn list_teams(&self, shard: String) -> StorageResult<Vec<TeamEntity>> {
        let documents: Vec<MongoTeamDocument> = self
            .teams()
            .await
            .find(doc! {"shard": shard})
            .sort(doc! {"score": -1, "created_at": 1})
            .await
            .map_err(op_error(TEAM_COLLECTION, "list teams"))?
            .try_collect()
            .await
            .map_err(op_error(TEAM_COLLECTION, "list teams"))?;

        Ok(documents
            .into_iter()
            .map(TeamEntity::try_from)
            .collect::<MongoResult<Vec<_>>>()?)
    }

    async fn increment_team(&self, id: Uuid, field: &str, delta: i64) -> StorageResult<TeamEntity> {
        let mut increment = Document::new();
        increment.insert(field, delta);
        let updated = self
            .teams()
            .await
            .find_one_and_update(doc_id(id), doc! {"$inc": increment})
            .return_document(ReturnDocument::After)
            .await
            .map_err(op_error(TEAM_COLLECTION, "increment team counter"))?
            .ok_or(StorageError::missing("team", id))?;
        Ok(TeamEntity::try_from(updated)?)
    }

    async fn delete_team(&self, id: Uuid) -> StorageResult<Option<TeamEntity>> {
        let removed = self
            .teams()
            .await
            .find_one_and_delete(doc_id(id))
            .await
            .map_err(op_error(TEAM_COLLECTION, "delete team"))?;
        Ok(removed.map(TeamEntity::try_from).transpose()?)
    }

    async fn insert_player(&self, player: PlayerEntity) -> StorageResult<PlayerEntity> {
        if self.find_team_by(doc_id(player.team_id)).await?.is_none() {
            return Err(StorageError::missing("team", player.team_id));
        }
        self.insert::<MongoPlayerDocument, _>(PLAYER_COLLECTION, player)
            .await
    }

    async fn find_player(&self, id: Uuid) -> StorageResult<Option<PlayerEntity>> {
        let document = self
            .players()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(op_error(PLAYER_COLLECTION, "load player"))?;
        Ok(document.map(PlayerEntity::try_from).transpose()?)
    }

    async fn list_submissions(&self, filter: Document) -> StorageResult<Vec<SubmissionEntity>> {
        let documents: Vec<MongoSubmissionDocument> = self
            .submissions()
            .await
            .find(filter)
            .sort(doc! {"submitted_at": 1})
            .await
            .map_err(op_error(SUBMISSION_COLLECTION, "list submissions"))?
            .try_collect()
            .await
            .map_err(op_error(SUBMISSION_COLLECTION, "list submissions"))?;

        Ok(documents
            .into_iter()
            .map(SubmissionEntity::try_from)
            .collect::<MongoResult<Vec<_>>>()?)
    }

    /// Record a submission, retrying the whole transaction on transient failures.
    async fn record_submission(
        &self,
        submission: SubmissionEntity,
    ) -> StorageResult<RecordedSubmission> {
        let client = self.client().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut session = client.start_session().await.map_err(|source| {
                MongoDaoError::Transaction {
                    step: "starting session",
                    source,
                }
            })?;

            match self.record_once(&mut session, &submission).await {
                Ok(recorded) => return Ok(recorded),
                Err(AttemptError::Rejected(err)) => return Err(err),
                Err(AttemptError::Driver { step, source }) => {
                    let _ = session.abort_transaction().await;
                    if may_retry(source.contains_label(TRANSIENT_TRANSACTION_ERROR), attempt) {
                        debug!(attempt, step, "retrying transient submission transaction");
                        continue;
                    }
                    warn!(attempt, step, error = %source, "submission transaction failed");
                    return Err(MongoDaoError::Transaction { step, source }.into());
                }
            }
        }
    }

    async fn record_once(
        &self,
        session: &mut ClientSession,
        submission: &SubmissionEntity,
    ) -> Result<RecordedSubmission, AttemptError> {
        let driver =
            |step: &'static str| move |source: MongoError| AttemptError::Driver { step, source };

        session
            .start_transaction()
            .await
            .map_err(driver("starting transaction"))?;

        let mut session_filter = doc_id(submission.session_id);
        session_filter.insert("status", SessionStatus::Active.as_str());
        let updated_session = self
            .sessions()
            .await
            .find_one_and_update(session_filter, doc! {"$inc": {"submission_count": 1}})
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(driver("counting submission"))?;

        let Some(updated_session) = updated_session else {
            let _ = session.abort_transaction().await;
            let rejection = match self.find_session(submission.session_id).await {
                Ok(Some(current)) => Conflict::SessionNotActive {
                    session_id: current.id,
                    status: current.status,
                }
                .into(),
                Ok(None) => StorageError::missing("session", submission.session_id),
                Err(err) => err,
            };
            return Err(AttemptError::Rejected(rejection));
        };

        let document: MongoSubmissionDocument = submission.clone().into();
        if let Err(err) = self
            .submissions()
            .await
            .insert_one(document)
            .session(&mut *session)
            .await
        {
            if is_duplicate_key(&err) {
                let _ = session.abort_transaction().await;
                return Err(AttemptError::Rejected(
                    Conflict::DuplicateSubmission {
                        player_id: submission.player_id,
                        session_id: submission.session_id,
                    }
                    .into(),
                ));
            }
            return Err(driver("inserting submission")(err));
        }

        let updated_team = self
            .teams()
            .await
            .find_one_and_update(
                doc_id(submission.team_id),
                doc! {"$inc": {"score": submission.score}},
            )
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(driver("crediting team"))?;

        let Some(updated_team) = updated_team else {
            let _ = session.abort_transaction().await;
            return Err(AttemptError::Rejected(StorageError::missing(
                "team",
                submission.team_id,
            )));
        };

        let mut commits = 0;
        loop {
            commits += 1;
            match session.commit_transaction().await {
                Ok(()) => break,
                Err(err)
                    if may_retry(err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT), commits) =>
                {
                    debug!(commits, "commit result unknown, committing again");
                }
                Err(err) => return Err(driver("committing")(err)),
            }
        }

        let team = TeamEntity::try_from(updated_team)
            .map_err(|err| AttemptError::Rejected(err.into()))?;
        let session = SessionEntity::try_from(updated_session)
            .map_err(|err| AttemptError::Rejected(err.into()))?;
        Ok(RecordedSubmission {
            submission: submission.clone(),
            team,
            session,
        })
    }
}

fn submission_filter(query: SubmissionQuery) -> Document {
    let mut filter = Document::new();
    if let Some(session_id) = query.session_id {
        filter.insert("session_id", session_id.to_string());
    }
    if let Some(team_id) = query.team_id {
        filter.insert("team_id", team_id.to_string());
    }
    filter
}

impl QuizStore for MongoQuizStore {
    fn insert_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert::<MongoSessionDocument, _>(SESSION_COLLECTION, session)
                .await
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await })
    }

    fn find_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_sessions(query).await })
    }

    fn transition_session(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.transition_session(id, from, to, at).await })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session(id).await })
    }

    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_team(team).await })
    }

    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_team_by(doc_id(id)).await })
    }

    fn find_team_by_name(
        &self,
        shard: String,
        name: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_team_by(doc! {"shard": shard, "name": name}).await })
    }

    fn list_teams(&self, shard: String) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_teams(shard).await })
    }

    fn increment_team_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        let store = self.clone();
        Box::pin(async move { store.increment_team(id, "score", delta).await })
    }

    fn increment_player_count(
        &self,
        id: Uuid,
        delta: u32,
    ) -> BoxFuture<'static, StorageResult<TeamEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_team(id, "player_count", i64::from(delta))
                .await
        })
    }

    fn delete_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.delete_team(id).await })
    }

    fn insert_player(
        &self,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(id).await })
    }

    fn record_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<RecordedSubmission>> {
        let store = self.clone();
        Box::pin(async move { store.record_submission(submission).await })
    }

    fn find_submission(
        &self,
        player_id: Uuid,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .submissions()
                .await
                .find_one(doc! {
                    "player_id": player_id.to_string(),
                    "session_id": session_id.to_string(),
                })
                .await
                .map_err(op_error(SUBMISSION_COLLECTION, "load submission"))?;
            Ok(document.map(SubmissionEntity::try_from).transpose()?)
        })
    }

    fn list_submissions(
        &self,
        query: SubmissionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_submissions(submission_filter(query)).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
