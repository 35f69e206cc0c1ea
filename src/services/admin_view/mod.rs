//! Per-admin aggregation actor over team, session and submission changes.

pub mod leaderboard;

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{SessionOrder, SessionQuery},
    dto::common::{SessionSummary, TeamSummary},
    error::ServiceError,
    services::scoring_engine::{self, TeamSessionScore},
    state::{
        SharedState,
        bus::{ChangeEvent, ChangeKind, Row, Table},
    },
};

use self::leaderboard::{AdminSnapshot, Leaderboard};

/// Errors surfaced by [`AdminViewHandle`].
#[derive(Debug, Error)]
pub enum AdminViewError {
    /// The actor task has exited.
    #[error("admin view has stopped")]
    Stopped,
    /// A store read behind the request failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

type ScoresReply = oneshot::Sender<Result<Vec<TeamSessionScore>, ServiceError>>;

enum Input {
    Change(ChangeEvent),
    Lagged(u64),
    StorageRecovered,
    ViewSession(Uuid),
    FetchScores(Uuid, ScoresReply),
    Shutdown,
}

/// Handle to a running admin view.
pub struct AdminViewHandle {
    inbox: mpsc::UnboundedSender<Input>,
    view: watch::Receiver<AdminSnapshot>,
    task: JoinHandle<()>,
}

impl AdminViewHandle {
    /// Subscribe to the shard's tables, then load the initial rows.
    pub fn spawn(state: SharedState) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(AdminSnapshot::default());

        let shard = state.config().shard.clone();
        let team_shard = shard.clone();
        let teams = state.bus().subscribe(
            Table::Teams,
            Some(Arc::new(move |event: &ChangeEvent| {
                matches!(&event.row, Row::Team(team) if team.shard == team_shard)
            })),
        );
        let sessions = state.bus().subscribe(
            Table::Sessions,
            Some(Arc::new(move |event: &ChangeEvent| {
                matches!(&event.row, Row::Session(session) if session.shard == shard)
            })),
        );
        // Submissions carry no shard; the actor drops those of unknown sessions.
        let submissions = state.bus().subscribe(Table::Submissions, None);
        let feeds = vec![
            teams.forward(inbox.clone(), Input::Change, Input::Lagged),
            sessions.forward(inbox.clone(), Input::Change, Input::Lagged),
            submissions.forward(inbox.clone(), Input::Change, Input::Lagged),
            watch_recovery(state.degraded_watcher(), inbox.clone()),
        ];

        let view_model = AdminView {
            leaderboard: Leaderboard::new(state.config().feed_limit),
            state,
            view: view_tx,
            feeds,
        };
        let task = tokio::spawn(view_model.run(rx));
        Self { inbox, view, task }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> AdminSnapshot {
        self.view.borrow().clone()
    }

    /// Watch the snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AdminSnapshot> {
        self.view.clone()
    }

    /// Teams by score, highest first.
    pub fn teams(&self) -> Vec<TeamSummary> {
        self.view.borrow().teams.clone()
    }

    /// Sessions by planned start, newest first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.view.borrow().sessions.clone()
    }

    /// Running per-team totals of `session_id`.
    pub fn session_scores(&self, session_id: Uuid) -> Vec<TeamSessionScore> {
        self.view
            .borrow()
            .session_scores
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Point the submission feed at `session_id`.
    pub fn view_session(&self, session_id: Uuid) -> Result<(), AdminViewError> {
        self.inbox
            .send(Input::ViewSession(session_id))
            .map_err(|_| AdminViewError::Stopped)
    }

    /// Rebuild the tally of `session_id` from the store.
    pub async fn fetch_session_scores(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<TeamSessionScore>, AdminViewError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Input::FetchScores(session_id, reply))
            .map_err(|_| AdminViewError::Stopped)?;
        Ok(response.await.map_err(|_| AdminViewError::Stopped)??)
    }

    /// Stop the actor and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.inbox.send(Input::Shutdown);
        let _ = self.task.await;
    }
}

struct AdminView {
    state: SharedState,
    leaderboard: Leaderboard,
    view: watch::Sender<AdminSnapshot>,
    feeds: Vec<JoinHandle<()>>,
}

impl AdminView {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        self.reload().await;
        self.publish();

        loop {
            let input = tokio::select! {
                _ = self.view.closed() => break,
                input = rx.recv() => input,
            };
            match input {
                None | Some(Input::Shutdown) => break,
                Some(input) => self.handle(input).await,
            }
            self.publish();
        }

        for feed in self.feeds.drain(..) {
            feed.abort();
        }
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Change(event) => self.apply(event).await,
            Input::Lagged(skipped) => {
                debug!(skipped, "admin view lagged; reloading");
                self.reload().await;
            }
            Input::StorageRecovered => self.reload().await,
            Input::ViewSession(session_id) => {
                self.leaderboard.view_session(session_id);
                self.refresh_scores(session_id).await;
            }
            Input::FetchScores(session_id, reply) => {
                let _ = reply.send(self.refresh_scores(session_id).await);
            }
            Input::Shutdown => {}
        }
    }

    /// Full read of teams and sessions, then the tally of the viewed session.
    async fn reload(&mut self) {
        let shard = self.state.config().shard.clone();
        let store = match self.state.require_store().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "admin view cannot load");
                return;
            }
        };

        let teams = store.list_teams(shard.clone()).await;
        let sessions = store
            .find_sessions(SessionQuery {
                shard: Some(shard),
                order: SessionOrder::StartDesc,
                ..SessionQuery::default()
            })
            .await;
        match (teams, sessions) {
            (Ok(teams), Ok(sessions)) => {
                info!(teams = teams.len(), sessions = sessions.len(), "admin view loaded");
                self.leaderboard.load(teams, sessions);
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "admin view load failed");
                return;
            }
        }

        if let Some(session_id) = self.leaderboard.snapshot().viewed_session {
            let _ = self.refresh_scores(session_id).await;
        }
    }

    async fn refresh_scores(
        &mut self,
        session_id: Uuid,
    ) -> Result<Vec<TeamSessionScore>, ServiceError> {
        match scoring_engine::fetch_session_submissions(&self.state, session_id).await {
            Ok(submissions) => Ok(self.leaderboard.replace_scores(session_id, &submissions)),
            Err(err) => {
                warn!(%session_id, error = %err, "session scores unavailable");
                Err(err)
            }
        }
    }

    async fn apply(&mut self, event: ChangeEvent) {
        match (event.kind, event.row) {
            (ChangeKind::Delete, Row::Team(team)) => self.leaderboard.remove_team(team.id),
            (_, Row::Team(team)) => self.leaderboard.upsert_team(team),
            (ChangeKind::Delete, Row::Session(session)) => {
                self.leaderboard.remove_session(session.id)
            }
            (_, Row::Session(session)) => self.leaderboard.upsert_session(session),
            (ChangeKind::Insert, Row::Submission(submission)) => {
                if !self.leaderboard.has_session(submission.session_id) {
                    return;
                }
                let team_name = self.team_name(submission.team_id).await;
                self.leaderboard.record_submission(&submission, team_name);
            }
            (_, Row::Submission(_) | Row::Player(_)) => {}
        }
    }

    /// Display name from the cached leaderboard, falling back to a point lookup.
    async fn team_name(&self, team_id: Uuid) -> String {
        if let Some(name) = self.leaderboard.team_name(team_id) {
            return name.to_owned();
        }
        let lookup = match self.state.require_store().await {
            Ok(store) => store.find_team(team_id).await.map_err(ServiceError::from),
            Err(err) => Err(err),
        };
        match lookup {
            Ok(Some(team)) => team.name,
            Ok(None) => team_id.to_string(),
            Err(err) => {
                debug!(%team_id, error = %err, "team name lookup failed");
                team_id.to_string()
            }
        }
    }

    fn publish(&self) {
        let next = self.leaderboard.snapshot();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn watch_recovery(
    mut degraded: watch::Receiver<bool>,
    inbox: mpsc::UnboundedSender<Input>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while degraded.changed().await.is_ok() {
            let healthy = !*degraded.borrow_and_update();
            if healthy && inbox.send(Input::StorageRecovered).is_err() {
                break;
            }
        }
    })
}
