use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    dto::{
        common::{SessionSummary, TeamSummary},
        sse::{
            ResyncEvent, ServerEvent, SessionChangedEvent, SessionDeletedEvent, SystemStatus,
            TeamChangedEvent, TeamDeletedEvent,
        },
    },
    services::admin_view::leaderboard::AdminSnapshot,
    state::{
        SharedState,
        bus::{ChangeEvent, ChangeKind, Delivery, Row, Table},
    },
};

const EVENT_TEAM_CREATED: &str = "team.created";
const EVENT_TEAM_UPDATED: &str = "team.updated";
const EVENT_TEAM_DELETED: &str = "team.deleted";
const EVENT_SESSION_CREATED: &str = "session.created";
const EVENT_SESSION_UPDATED: &str = "session.updated";
const EVENT_SESSION_DELETED: &str = "session.deleted";
const EVENT_SYSTEM_STATUS: &str = "system.status";
const EVENT_RESYNC: &str = "resync";
pub(crate) const EVENT_HANDSHAKE: &str = "handshake";
pub(crate) const EVENT_ADMIN_SNAPSHOT: &str = "admin.snapshot";

/// Relay team and session changes of the shard, plus degraded mode flips, to
/// the public stream until the task is aborted.
pub async fn run(state: SharedState) {
    let shard = state.config().shard.clone();
    let team_shard = shard.clone();
    let mut teams = state.bus().subscribe(
        Table::Teams,
        Some(Arc::new(move |event: &ChangeEvent| {
            matches!(&event.row, Row::Team(team) if team.shard == team_shard)
        })),
    );
    let mut sessions = state.bus().subscribe(
        Table::Sessions,
        Some(Arc::new(move |event: &ChangeEvent| {
            matches!(&event.row, Row::Session(session) if session.shard == shard)
        })),
    );
    let mut degraded = state.degraded_watcher();

    loop {
        let delivery = tokio::select! {
            delivery = teams.recv() => delivery,
            delivery = sessions.recv() => delivery,
            changed = degraded.changed() => {
                if changed.is_err() {
                    break;
                }
                let flag = *degraded.borrow_and_update();
                broadcast_system_status(&state, flag);
                continue;
            }
        };
        match delivery {
            Some(Delivery::Event(event)) => broadcast_change(&state, &event),
            Some(Delivery::Lagged(skipped)) => {
                debug!(skipped, "public relay lagged");
                send_public_event(&state, EVENT_RESYNC, &ResyncEvent { skipped });
            }
            None => break,
        }
    }
}

/// Map a change to its public SSE event. Player and submission rows stay private.
pub fn public_event(event: &ChangeEvent) -> Option<ServerEvent> {
    let result = match (&event.kind, &event.row) {
        (ChangeKind::Delete, Row::Team(team)) => {
            ServerEvent::json(EVENT_TEAM_DELETED.to_string(), &TeamDeletedEvent { team_id: team.id })
        }
        (kind, Row::Team(team)) => {
            let name = if *kind == ChangeKind::Insert {
                EVENT_TEAM_CREATED
            } else {
                EVENT_TEAM_UPDATED
            };
            ServerEvent::json(
                name.to_string(),
                &TeamChangedEvent {
                    team: TeamSummary::from(team),
                },
            )
        }
        (ChangeKind::Delete, Row::Session(session)) => ServerEvent::json(
            EVENT_SESSION_DELETED.to_string(),
            &SessionDeletedEvent {
                session_id: session.id,
            },
        ),
        (kind, Row::Session(session)) => {
            let name = if *kind == ChangeKind::Insert {
                EVENT_SESSION_CREATED
            } else {
                EVENT_SESSION_UPDATED
            };
            ServerEvent::json(
                name.to_string(),
                &SessionChangedEvent {
                    session: SessionSummary::from(session),
                },
            )
        }
        (_, Row::Player(_) | Row::Submission(_)) => return None,
    };
    match result {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialise change event");
            None
        }
    }
}

/// Relay one change event to the public SSE hub.
pub fn broadcast_change(state: &SharedState, event: &ChangeEvent) {
    if let Some(event) = public_event(event) {
        state.public_sse().broadcast(event);
    }
}

/// Broadcast the degraded flag to both streams.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    let payload = SystemStatus { degraded };
    send_public_event(state, EVENT_SYSTEM_STATUS, &payload);
    send_admin_event(state, EVENT_SYSTEM_STATUS, &payload);
}

/// Admin read model as an SSE event.
pub fn admin_snapshot_event(snapshot: &AdminSnapshot) -> Option<ServerEvent> {
    ServerEvent::json(EVENT_ADMIN_SNAPSHOT.to_string(), snapshot)
        .inspect_err(|err| warn!(error = %err, "failed to serialise admin snapshot"))
        .ok()
}

fn send_public_event<T: Serialize>(state: &SharedState, event: &str, payload: &T) {
    match ServerEvent::json(event.to_string(), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(error = %err, event, "failed to serialise public event"),
    }
}

fn send_admin_event<T: Serialize>(state: &SharedState, event: &str, payload: &T) {
    match ServerEvent::json(event.to_string(), payload) {
        Ok(event) => state.admin_sse().broadcast(event),
        Err(err) => warn!(error = %err, event, "failed to serialise admin event"),
    }
}
