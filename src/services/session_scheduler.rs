use std::time::SystemTime;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::session_controller::{current_active, end_session, next_scheduled, start_session},
    state::SharedState,
};

/// Changes applied by one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Session completed by the auto-end rule.
    pub ended: Option<Uuid>,
    /// Session promoted to active.
    pub started: Option<Uuid>,
}

/// Promote due sessions of the configured shard until the task is aborted.
pub async fn run(state: SharedState) {
    let scheduler = state.config().scheduler;
    if !scheduler.enabled {
        info!("session scheduler disabled");
        return;
    }

    let mut ticker = interval(scheduler.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = tick(&state, SystemTime::now()).await {
            if err.is_retryable() {
                debug!(error = %err, "scheduler pass skipped");
            } else {
                warn!(error = %err, "scheduler pass failed");
            }
        }
    }
}

/// One pass: complete an overdue active session, then start the earliest due
/// scheduled session when the shard has none active.
///
/// Lost races against admins surface as conflicts and are ignored.
pub async fn tick(state: &SharedState, now: SystemTime) -> Result<TickOutcome, ServiceError> {
    let config = state.config();
    let shard = config.shard.as_str();
    let mut outcome = TickOutcome::default();

    if let Some(active) = current_active(state, shard).await? {
        let overdue = match (config.scheduler.auto_end_after, active.started_at) {
            (Some(limit), Some(started_at)) => started_at + limit <= now,
            _ => false,
        };
        if !overdue {
            return Ok(outcome);
        }
        match end_session(state, active.id).await {
            Ok(session) => {
                info!(session_id = %session.id, "session auto-completed");
                outcome.ended = Some(session.id);
            }
            Err(ServiceError::Conflict(conflict)) => {
                debug!(%conflict, "auto-complete lost a race");
                return Ok(outcome);
            }
            Err(err) => return Err(err),
        }
    }

    let Some(next) = next_scheduled(state, shard).await? else {
        return Ok(outcome);
    };
    if next.start_time > now {
        return Ok(outcome);
    }
    match start_session(state, next.id).await {
        Ok(session) => {
            info!(session_id = %session.id, "scheduled session promoted");
            outcome.started = Some(session.id);
        }
        Err(ServiceError::Conflict(conflict)) => {
            debug!(%conflict, "promotion lost a race");
        }
        Err(err) => return Err(err),
    }
    Ok(outcome)
}
