use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        models::{PlayerEntity, TeamEntity},
        storage::{Conflict, StorageError},
    },
    error::ServiceError,
    state::SharedState,
};

const MIN_NAME_LEN: usize = 2;

/// Identity a player keeps between connections; revalidated on every resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PlayerCredential {
    /// Player identifier.
    pub player_id: Uuid,
    /// Team identifier.
    pub team_id: Uuid,
}

/// Rows behind a valid credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedPlayer {
    /// Stored player.
    pub player: PlayerEntity,
    /// Stored team.
    pub team: TeamEntity,
}

impl JoinedPlayer {
    /// Credential pointing at these rows.
    pub fn credential(&self) -> PlayerCredential {
        PlayerCredential {
            player_id: self.player.id,
            team_id: self.team.id,
        }
    }
}

fn checked_name(field: &str, value: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "{field} must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Register a player, joining the named team of the shard or creating it.
pub async fn join(
    state: &SharedState,
    player_name: &str,
    team_name: &str,
) -> Result<JoinedPlayer, ServiceError> {
    let player_name = checked_name("player name", player_name)?;
    let team_name = checked_name("team name", team_name)?;
    let shard = state.config().shard.clone();
    let store = state.require_store().await?;

    let team = match store
        .find_team_by_name(shard.clone(), team_name.clone())
        .await?
    {
        Some(team) => team,
        None => match store
            .insert_team(TeamEntity::new(shard.clone(), team_name.clone()))
            .await
        {
            Ok(team) => {
                info!(team_id = %team.id, name = %team.name, "team created");
                team
            }
            // Lost a creation race: join the winner.
            Err(StorageError::Conflict(Conflict::DuplicateTeamName { .. })) => store
                .find_team_by_name(shard, team_name.clone())
                .await?
                .ok_or_else(|| ServiceError::Data(format!("team `{team_name}` vanished")))?,
            Err(err) => return Err(err.into()),
        },
    };

    let player = store
        .insert_player(PlayerEntity::new(player_name, team.id))
        .await?;
    let team = store.increment_player_count(team.id, 1).await?;
    info!(player_id = %player.id, team_id = %team.id, "player joined");
    Ok(JoinedPlayer { player, team })
}

/// Check that the credential still designates a player of an existing team.
pub async fn resume(
    state: &SharedState,
    credential: PlayerCredential,
) -> Result<JoinedPlayer, ServiceError> {
    let store = state.require_store().await?;
    let player = store
        .find_player(credential.player_id)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("unknown player".into()))?;
    if player.team_id != credential.team_id {
        return Err(ServiceError::Unauthorized(
            "player does not belong to this team".into(),
        ));
    }
    let team = store
        .find_team(credential.team_id)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("team no longer exists".into()))?;
    Ok(JoinedPlayer { player, team })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_state;

    #[tokio::test]
    async fn second_player_joins_existing_team() {
        let (state, _) = memory_state();
        let first = join(&state, "Ada", "Owls").await.unwrap();
        let second = join(&state, "Grace", "  Owls ").await.unwrap();

        assert_eq!(first.team.id, second.team.id);
        assert_eq!(second.team.player_count, 2);
        assert_eq!(second.team.score, 0);
    }

    #[tokio::test]
    async fn short_names_are_rejected() {
        let (state, _) = memory_state();
        assert!(matches!(
            join(&state, "A", "Owls").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            join(&state, "Ada", " O ").await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resume_revalidates_credential() {
        let (state, _) = memory_state();
        let joined = join(&state, "Ada", "Owls").await.unwrap();
        let other = join(&state, "Linus", "Foxes").await.unwrap();

        assert_eq!(
            resume(&state, joined.credential()).await.unwrap().player.id,
            joined.player.id
        );

        let forged = PlayerCredential {
            player_id: joined.player.id,
            team_id: other.team.id,
        };
        assert!(matches!(
            resume(&state, forged).await,
            Err(ServiceError::Unauthorized(_))
        ));

        state
            .require_store()
            .await
            .unwrap()
            .delete_team(joined.team.id)
            .await
            .unwrap();
        assert!(matches!(
            resume(&state, joined.credential()).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
