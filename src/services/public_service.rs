//! Service helpers that expose read-only public projections of the served shard.

use crate::{
    dto::{
        common::SessionSummary,
        player::{JoinRequest, LeaderboardResponse, NextSessionResponse, PlayerSessionResponse},
    },
    error::ServiceError,
    services::{
        admin_service,
        join_service::{self, PlayerCredential},
        session_controller,
    },
    state::SharedState,
};

/// Return the teams of the shard, highest score first.
pub async fn get_leaderboard(state: &SharedState) -> Result<LeaderboardResponse, ServiceError> {
    let teams = admin_service::list_teams(state).await?;
    Ok(LeaderboardResponse { teams })
}

/// Return the running session, and the next scheduled one when nothing runs.
pub async fn get_next_session(state: &SharedState) -> Result<NextSessionResponse, ServiceError> {
    let shard = state.config().shard.clone();
    let active = session_controller::current_active(state, &shard).await?;
    let next = match active {
        Some(_) => None,
        None => session_controller::next_scheduled(state, &shard).await?,
    };
    Ok(NextSessionResponse {
        active: active.as_ref().map(SessionSummary::from),
        next: next.as_ref().map(SessionSummary::from),
    })
}

/// Register a player and hand back the credential used on the WebSocket.
pub async fn join(
    state: &SharedState,
    payload: JoinRequest,
) -> Result<PlayerSessionResponse, ServiceError> {
    let joined = join_service::join(state, &payload.player_name, &payload.team_name).await?;
    Ok(joined.into())
}

/// Revalidate a stored credential.
pub async fn resume(
    state: &SharedState,
    credential: PlayerCredential,
) -> Result<PlayerSessionResponse, ServiceError> {
    let joined = join_service::resume(state, credential).await?;
    Ok(joined.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{active_session, memory_state, scheduled_session};
    use uuid::Uuid;

    #[tokio::test]
    async fn next_session_prefers_the_running_one() {
        let (state, _) = memory_state();
        let empty = get_next_session(&state).await.unwrap();
        assert!(empty.active.is_none() && empty.next.is_none());

        let scheduled = scheduled_session(&state).await;
        let waiting = get_next_session(&state).await.unwrap();
        assert_eq!(waiting.next.map(|session| session.id), Some(scheduled.id));

        let running = active_session(&state).await;
        let playing = get_next_session(&state).await.unwrap();
        assert_eq!(playing.active.map(|session| session.id), Some(running.id));
        assert!(playing.next.is_none());
    }

    #[tokio::test]
    async fn join_then_resume_returns_the_same_credential() {
        let (state, _) = memory_state();
        let joined = join(
            &state,
            JoinRequest {
                player_name: "Ada".into(),
                team_name: "Owls".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(joined.team.player_count, 1);

        let resumed = resume(&state, joined.credential).await.unwrap();
        assert_eq!(resumed.credential, joined.credential);
        assert_eq!(resumed.player_name, "Ada");

        let forged = PlayerCredential {
            player_id: Uuid::new_v4(),
            team_id: joined.credential.team_id,
        };
        assert!(matches!(
            resume(&state, forged).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let board = get_leaderboard(&state).await.unwrap();
        assert_eq!(board.teams.len(), 1);
    }
}
