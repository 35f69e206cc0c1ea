//! Per-player actor driving one connected player through waiting, play and completion.
//!
//! Lifecycle events, own-team events, clock ticks and player actions all land on
//! one inbound channel and are handled one at a time. The read model is
//! published through a `watch` channel after every input.

pub mod attempt;

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::GameRules,
    dao::{
        models::{SessionEntity, SessionStatus},
        storage::Conflict,
    },
    dto::common::SessionSummary,
    error::ServiceError,
    services::{
        join_service::{self, JoinedPlayer, PlayerCredential},
        scoring_engine::{self, SubmissionRequest},
        session_controller,
    },
    state::{
        SharedState,
        bus::{ChangeEvent, ChangeKind, Row, Table},
    },
};

use self::attempt::{Attempt, AttemptResult, AttemptView, EndReason};

const CLOCK_PERIOD: Duration = Duration::from_secs(1);
const WAITING_MESSAGE: &str = "Waiting for the next session to start";
const UNAVAILABLE_MESSAGE: &str = "Game temporarily unavailable, reconnecting";

/// Errors surfaced by [`PlayerClientHandle`].
#[derive(Debug, Error)]
pub enum PlayerClientError {
    /// The actor task has exited.
    #[error("player client has stopped")]
    Stopped,
}

/// Commands a connected player can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    /// Bind (or rebind) the client to a credential.
    Identify(PlayerCredential),
    /// Toggle one grid item.
    Select {
        /// Identifier of the word in the grid.
        item_id: u32,
    },
    /// Re-send a submission that failed transiently.
    RetrySubmission,
    /// Drop the credential and return to unbound.
    Logout,
}

/// Identity of the bound player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerIdentity {
    /// Player identifier.
    pub player_id: Uuid,
    /// Name chosen at join.
    pub player_name: String,
    /// Team identifier.
    pub team_id: Uuid,
    /// Current team name.
    pub team_name: String,
    /// Latest known team score; never moves down.
    pub team_score: i64,
}

/// Where the final submission of an attempt stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Nothing was recorded: the session closed before the submission landed.
    Skipped,
    /// Sent, waiting for the store.
    Pending,
    /// Stored and credited to the team.
    Recorded,
    /// The store already holds a submission for this player and session.
    AlreadyRecorded,
    /// The store refused or could not be reached.
    Failed {
        /// Error shown to the player.
        message: String,
        /// Whether `retry_submission` may succeed.
        retryable: bool,
    },
}

/// Phase-specific part of the player read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseView {
    /// No valid credential.
    Unbound {
        /// Why the previous identity was dropped.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Identified, no session to play.
    Waiting {
        /// Next scheduled session, if any.
        upcoming: Option<SessionSummary>,
        /// Status line for the player.
        message: String,
    },
    /// Playing the running session.
    Active {
        /// Session being played.
        session: SessionSummary,
        /// Local attempt state.
        attempt: AttemptView,
    },
    /// Done with the running session.
    Completed {
        /// Session the result belongs to.
        session_id: Uuid,
        /// Final score.
        score: i64,
        /// All four categories solved.
        is_correct: bool,
        /// Why the attempt stopped; `None` when restored from the store.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
        /// Where the submission stands.
        submission: SubmissionStatus,
    },
}

/// Read model of one player client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlayerView {
    /// Bound player, if any.
    pub identity: Option<PlayerIdentity>,
    /// Current phase.
    pub phase: PhaseView,
}

impl PlayerView {
    fn unbound() -> Self {
        Self {
            identity: None,
            phase: PhaseView::Unbound { reason: None },
        }
    }
}

/// Spawn-time knobs.
#[derive(Debug, Clone, Copy)]
pub struct PlayerClientOptions {
    /// Drive the countdown from a one-second clock; tests advance it by hand.
    pub realtime_clock: bool,
}

impl Default for PlayerClientOptions {
    fn default() -> Self {
        Self {
            realtime_clock: true,
        }
    }
}

enum Input {
    Session(ChangeEvent),
    Team(ChangeEvent),
    Lagged(u64),
    StorageRecovered,
    Tick(u32),
    Action(PlayerAction),
    Shutdown,
}

/// Handle to a running player client.
pub struct PlayerClientHandle {
    inbox: mpsc::UnboundedSender<Input>,
    view: watch::Receiver<PlayerView>,
    task: JoinHandle<()>,
}

impl PlayerClientHandle {
    /// Spawn a client, optionally resuming with `credential`.
    pub fn spawn(state: SharedState, credential: Option<PlayerCredential>) -> Self {
        Self::spawn_with(state, credential, PlayerClientOptions::default())
    }

    /// Spawn with explicit options.
    pub fn spawn_with(
        state: SharedState,
        credential: Option<PlayerCredential>,
        options: PlayerClientOptions,
    ) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(PlayerView::unbound());

        // Subscribe before the first load so no lifecycle change is missed.
        let shard = state.config().shard.clone();
        let sessions = state.bus().subscribe(
            Table::Sessions,
            Some(Arc::new(move |event: &ChangeEvent| {
                matches!(&event.row, Row::Session(session) if session.shard == shard)
            })),
        );
        let mut feeds = vec![
            sessions.forward(inbox.clone(), Input::Session, Input::Lagged),
            watch_recovery(state.degraded_watcher(), inbox.clone()),
        ];
        if options.realtime_clock {
            feeds.push(run_clock(inbox.clone()));
        }

        let rules = state.config().rules;
        let client = PlayerClient {
            state,
            rules,
            credential,
            identity: None,
            phase: Phase::Unbound { reason: None },
            inbox: inbox.clone(),
            view: view_tx,
            feeds,
            team_feed: None,
        };
        let task = tokio::spawn(client.run(rx));
        Self { inbox, view, task }
    }

    /// Queue a player action.
    pub fn send(&self, action: PlayerAction) -> Result<(), PlayerClientError> {
        self.inbox
            .send(Input::Action(action))
            .map_err(|_| PlayerClientError::Stopped)
    }

    /// Advance the countdown by `secs`.
    pub fn advance(&self, secs: u32) -> Result<(), PlayerClientError> {
        self.inbox
            .send(Input::Tick(secs))
            .map_err(|_| PlayerClientError::Stopped)
    }

    /// Current read model.
    pub fn state(&self) -> PlayerView {
        self.view.borrow().clone()
    }

    /// Watch the read model.
    pub fn subscribe(&self) -> watch::Receiver<PlayerView> {
        self.view.clone()
    }

    /// Stop the client and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.inbox.send(Input::Shutdown);
        let _ = self.task.await;
    }
}

enum Phase {
    Unbound {
        reason: Option<String>,
    },
    Waiting {
        upcoming: Option<SessionEntity>,
        message: String,
    },
    Active {
        session: SessionEntity,
        attempt: Attempt,
    },
    Completed {
        session_id: Uuid,
        score: i64,
        is_correct: bool,
        reason: Option<EndReason>,
        submission: SubmissionStatus,
        /// Kept until the store acknowledges it, for retries.
        pending: Option<SubmissionRequest>,
    },
}

impl Phase {
    fn unavailable(err: &ServiceError) -> Self {
        debug!(error = %err, "player client waiting on storage");
        Phase::Waiting {
            upcoming: None,
            message: UNAVAILABLE_MESSAGE.into(),
        }
    }

    fn closed(session_id: Uuid, result: AttemptResult) -> Self {
        Phase::Completed {
            session_id,
            score: result.score,
            is_correct: result.is_correct,
            reason: Some(result.reason),
            submission: SubmissionStatus::Skipped,
            pending: None,
        }
    }

    fn view(&self) -> PhaseView {
        match self {
            Phase::Unbound { reason } => PhaseView::Unbound {
                reason: reason.clone(),
            },
            Phase::Waiting { upcoming, message } => PhaseView::Waiting {
                upcoming: upcoming.as_ref().map(SessionSummary::from),
                message: message.clone(),
            },
            Phase::Active { session, attempt } => PhaseView::Active {
                session: SessionSummary::from(session),
                attempt: attempt.view(),
            },
            Phase::Completed {
                session_id,
                score,
                is_correct,
                reason,
                submission,
                ..
            } => PhaseView::Completed {
                session_id: *session_id,
                score: *score,
                is_correct: *is_correct,
                reason: *reason,
                submission: submission.clone(),
            },
        }
    }
}

struct PlayerClient {
    state: SharedState,
    rules: GameRules,
    credential: Option<PlayerCredential>,
    identity: Option<PlayerIdentity>,
    phase: Phase,
    inbox: mpsc::UnboundedSender<Input>,
    view: watch::Sender<PlayerView>,
    feeds: Vec<JoinHandle<()>>,
    team_feed: Option<(Uuid, JoinHandle<()>)>,
}

impl PlayerClient {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        self.resume().await;
        self.publish();

        loop {
            let input = tokio::select! {
                // Every view receiver is gone: nobody is listening any more.
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
        if let Some((_, feed)) = self.team_feed.take() {
            feed.abort();
        }
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Session(event) => self.on_session_event(event).await,
            Input::Team(event) => self.on_team_event(event),
            Input::Lagged(skipped) => {
                debug!(skipped, "player client lagged; resuming");
                self.resume().await;
            }
            Input::StorageRecovered => {
                if matches!(self.phase, Phase::Waiting { .. }) {
                    self.resume().await;
                }
            }
            Input::Tick(secs) => {
                let finished = match &mut self.phase {
                    Phase::Active { attempt, .. } => attempt
                        .tick(secs)
                        .map(|result| (attempt.session_id(), result)),
                    _ => None,
                };
                if let Some((session_id, result)) = finished {
                    self.submit(session_id, result).await;
                }
            }
            Input::Action(action) => self.on_action(action).await,
            Input::Shutdown => {}
        }
    }

    async fn on_action(&mut self, action: PlayerAction) {
        match action {
            PlayerAction::Identify(credential) => {
                self.credential = Some(credential);
                self.identity = None;
                self.phase = Phase::Unbound { reason: None };
                self.resume().await;
            }
            PlayerAction::Select { item_id } => {
                let finished = match &mut self.phase {
                    Phase::Active { attempt, .. } => attempt
                        .toggle(item_id)
                        .map(|result| (attempt.session_id(), result)),
                    _ => None,
                };
                if let Some((session_id, result)) = finished {
                    self.submit(session_id, result).await;
                }
            }
            PlayerAction::RetrySubmission => {
                let request = match &self.phase {
                    Phase::Completed {
                        submission: SubmissionStatus::Failed { retryable: true, .. },
                        pending: Some(request),
                        ..
                    } => *request,
                    _ => return,
                };
                self.set_submission(SubmissionStatus::Pending);
                self.publish();
                self.send_submission(request).await;
            }
            PlayerAction::Logout => self.logout(None),
        }
    }

    /// Revalidate the credential, then bind to the shard's current session.
    async fn resume(&mut self) {
        let Some(credential) = self.credential else {
            self.phase = Phase::Unbound { reason: None };
            return;
        };
        self.follow_team(credential.team_id);

        match join_service::resume(&self.state, credential).await {
            Ok(joined) => self.set_identity(joined),
            Err(err) if err.is_retryable() => {
                self.keep_or_wait(&err);
                return;
            }
            Err(err) => {
                self.logout(Some(err.to_string()));
                return;
            }
        }
        self.sync_session().await;
    }

    /// A running attempt or an unacknowledged submission outlives a failed read.
    fn keep_or_wait(&mut self, err: &ServiceError) {
        if matches!(self.phase, Phase::Active { .. } | Phase::Completed { .. }) {
            debug!(error = %err, "player client keeps its phase through a storage error");
        } else {
            self.phase = Phase::unavailable(err);
        }
    }

    fn set_identity(&mut self, joined: JoinedPlayer) {
        let team_score = self
            .identity
            .as_ref()
            .filter(|identity| identity.team_id == joined.team.id)
            .map_or(joined.team.score, |identity| {
                identity.team_score.max(joined.team.score)
            });
        self.identity = Some(PlayerIdentity {
            player_id: joined.player.id,
            player_name: joined.player.name,
            team_id: joined.team.id,
            team_name: joined.team.name,
            team_score,
        });
    }

    fn follow_team(&mut self, team_id: Uuid) {
        if self.team_feed.as_ref().is_some_and(|(id, _)| *id == team_id) {
            return;
        }
        if let Some((_, feed)) = self.team_feed.take() {
            feed.abort();
        }
        let subscription = self.state.bus().subscribe(
            Table::Teams,
            Some(Arc::new(move |event: &ChangeEvent| {
                matches!(&event.row, Row::Team(team) if team.id == team_id)
            })),
        );
        self.team_feed = Some((
            team_id,
            subscription.forward(self.inbox.clone(), Input::Team, Input::Lagged),
        ));
    }

    /// Reconcile the local phase with the shard's active session.
    async fn sync_session(&mut self) {
        let shard = self.state.config().shard.clone();
        let active = match session_controller::current_active(&self.state, &shard).await {
            Ok(active) => active,
            Err(err) => {
                self.keep_or_wait(&err);
                return;
            }
        };

        if let Phase::Active { attempt, .. } = &mut self.phase {
            let session_id = attempt.session_id();
            if active.as_ref().is_some_and(|session| session.id == session_id) {
                return;
            }
            let result = attempt.close();
            self.phase = Phase::closed(session_id, result);
        }

        match active {
            Some(session) => {
                let already_bound = matches!(
                    &self.phase,
                    Phase::Completed { session_id, .. } if *session_id == session.id
                );
                if !already_bound {
                    self.bind(session).await;
                }
            }
            None => {
                if !matches!(self.phase, Phase::Completed { .. }) {
                    self.wait().await;
                }
            }
        }
    }

    /// Enter `session`: completed if this player already submitted, active otherwise.
    async fn bind(&mut self, session: SessionEntity) {
        let Some(identity) = &self.identity else {
            return;
        };
        let store = match self.state.require_store().await {
            Ok(store) => store,
            Err(err) => {
                self.phase = Phase::unavailable(&err);
                return;
            }
        };

        match store.find_submission(identity.player_id, session.id).await {
            Ok(Some(previous)) => {
                self.phase = Phase::Completed {
                    session_id: session.id,
                    score: previous.score,
                    is_correct: previous.is_correct,
                    reason: None,
                    submission: SubmissionStatus::AlreadyRecorded,
                    pending: None,
                };
            }
            Ok(None) => {
                match session_controller::assemble_grid(&self.state.config().word_bank, &session) {
                    Ok(grid) => {
                        info!(player_id = %identity.player_id, session_id = %session.id, "attempt started");
                        let attempt = Attempt::new(session.id, grid, session.window_secs, &self.rules);
                        self.phase = Phase::Active { session, attempt };
                    }
                    Err(err) => {
                        warn!(session_id = %session.id, error = %err, "cannot build grid");
                        self.phase = Phase::Waiting {
                            upcoming: None,
                            message: err.to_string(),
                        };
                    }
                }
            }
            Err(err) => self.phase = Phase::unavailable(&ServiceError::from(err)),
        }
    }

    async fn wait(&mut self) {
        let shard = self.state.config().shard.clone();
        self.phase = match session_controller::next_scheduled(&self.state, &shard).await {
            Ok(upcoming) => Phase::Waiting {
                upcoming,
                message: WAITING_MESSAGE.into(),
            },
            Err(err) => Phase::unavailable(&err),
        };
    }

    async fn on_session_event(&mut self, event: ChangeEvent) {
        let Row::Session(session) = event.row else {
            return;
        };
        if self.identity.is_none() {
            return;
        }

        if event.kind == ChangeKind::Delete {
            if matches!(&self.phase, Phase::Waiting { upcoming: Some(upcoming), .. } if upcoming.id == session.id)
            {
                self.wait().await;
            }
            return;
        }

        match session.status {
            SessionStatus::Active => {
                let rebind = match &self.phase {
                    Phase::Waiting { .. } => true,
                    Phase::Completed { session_id, .. } => *session_id != session.id,
                    Phase::Active { .. } | Phase::Unbound { .. } => false,
                };
                if rebind {
                    self.bind(session).await;
                }
            }
            SessionStatus::Completed => {
                if let Phase::Active { attempt, .. } = &mut self.phase {
                    if attempt.session_id() == session.id {
                        // Closed by the host: the store would reject a submission now.
                        let result = attempt.close();
                        info!(session_id = %session.id, "attempt closed by session end");
                        self.phase = Phase::closed(session.id, result);
                    }
                } else if matches!(self.phase, Phase::Waiting { .. }) {
                    self.wait().await;
                }
            }
            SessionStatus::Scheduled => {
                if matches!(self.phase, Phase::Waiting { .. }) {
                    self.wait().await;
                }
            }
        }
    }

    fn on_team_event(&mut self, event: ChangeEvent) {
        let Row::Team(team) = event.row else {
            return;
        };
        let Some(identity) = self.identity.as_mut() else {
            return;
        };
        if identity.team_id != team.id {
            return;
        }

        match event.kind {
            ChangeKind::Delete => self.logout(Some("team was removed".into())),
            ChangeKind::Insert | ChangeKind::Update => {
                identity.team_name = team.name;
                identity.team_score = identity.team_score.max(team.score);
            }
        }
    }

    async fn submit(&mut self, session_id: Uuid, result: AttemptResult) {
        let Some(identity) = &self.identity else {
            return;
        };
        let request = SubmissionRequest {
            player_id: identity.player_id,
            team_id: identity.team_id,
            session_id,
            is_correct: result.is_correct,
            score: result.score,
        };
        info!(
            player_id = %request.player_id,
            %session_id,
            score = result.score,
            reason = ?result.reason,
            "attempt finished"
        );
        self.phase = Phase::Completed {
            session_id,
            score: result.score,
            is_correct: result.is_correct,
            reason: Some(result.reason),
            submission: SubmissionStatus::Pending,
            pending: Some(request),
        };
        self.publish();
        self.send_submission(request).await;
    }

    async fn send_submission(&mut self, request: SubmissionRequest) {
        let status = match scoring_engine::record_submission(&self.state, request).await {
            Ok(_) => SubmissionStatus::Recorded,
            Err(ServiceError::Conflict(Conflict::SessionNotActive { session_id, status })) => {
                info!(%session_id, %status, "submission arrived after the session closed");
                SubmissionStatus::Skipped
            }
            Err(ServiceError::Conflict(_)) => SubmissionStatus::AlreadyRecorded,
            Err(err) => SubmissionStatus::Failed {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        };
        self.set_submission(status);
    }

    fn set_submission(&mut self, status: SubmissionStatus) {
        if let Phase::Completed {
            submission,
            pending,
            ..
        } = &mut self.phase
        {
            if matches!(
                status,
                SubmissionStatus::Recorded | SubmissionStatus::AlreadyRecorded | SubmissionStatus::Skipped
            ) {
                *pending = None;
            }
            *submission = status;
        }
    }

    fn logout(&mut self, reason: Option<String>) {
        if let Some(identity) = self.identity.take() {
            info!(player_id = %identity.player_id, reason = ?reason, "player logged out");
        }
        self.credential = None;
        if let Some((_, feed)) = self.team_feed.take() {
            feed.abort();
        }
        self.phase = Phase::Unbound { reason };
    }

    fn publish(&self) {
        let next = PlayerView {
            identity: self.identity.clone(),
            phase: self.phase.view(),
        };
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

fn run_clock(inbox: mpsc::UnboundedSender<Input>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut clock = interval(CLOCK_PERIOD);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        clock.tick().await;
        loop {
            clock.tick().await;
            if inbox.send(Input::Tick(1)).is_err() {
                break;
            }
        }
    })
}
