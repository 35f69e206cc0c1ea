//! DTO definitions for the player join flow and public read endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        common::{SessionSummary, TeamSummary},
        validation::validate_display_name,
    },
    services::join_service::{JoinedPlayer, PlayerCredential},
};

/// Payload registering a player, creating the team on first use.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Name shown on the admin feed; trimmed before use.
    #[validate(custom(function = "validate_display_name"))]
    pub player_name: String,
    /// Team to join, created when the shard has none by that name.
    #[validate(custom(function = "validate_display_name"))]
    pub team_name: String,
}

/// Credential a player stored from a previous join.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResumeRequest {
    /// Player identifier returned by join.
    pub player_id: Uuid,
    /// Team the player joined.
    pub team_id: Uuid,
}

impl From<ResumeRequest> for PlayerCredential {
    fn from(request: ResumeRequest) -> Self {
        Self {
            player_id: request.player_id,
            team_id: request.team_id,
        }
    }
}

/// Identity returned by join and resume; the credential identifies the
/// player on the WebSocket.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerSessionResponse {
    /// Identifiers to send in the WebSocket `identify` frame.
    pub credential: PlayerCredential,
    /// Name as stored.
    pub player_name: String,
    /// Team the player belongs to.
    pub team: TeamSummary,
}

impl From<JoinedPlayer> for PlayerSessionResponse {
    fn from(joined: JoinedPlayer) -> Self {
        Self {
            credential: joined.credential(),
            player_name: joined.player.name,
            team: TeamSummary::from(&joined.team),
        }
    }
}

/// Teams of the shard, highest score first.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    /// Teams of the shard.
    pub teams: Vec<TeamSummary>,
}

/// What players are waiting for: the running session, else the next one.
#[derive(Debug, Serialize, ToSchema)]
pub struct NextSessionResponse {
    /// Session currently running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<SessionSummary>,
    /// Earliest scheduled session, only when none runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_needs_two_characters_per_name() {
        let ok: JoinRequest =
            serde_json::from_str(r#"{"player_name":"Ada","team_name":"Owls"}"#).unwrap();
        assert!(ok.validate().is_ok());

        let short: JoinRequest =
            serde_json::from_str(r#"{"player_name":"A","team_name":" O "}"#).unwrap();
        let errors = short.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("player_name"));
        assert!(errors.field_errors().contains_key("team_name"));
    }
}
