use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::{
    join_service::PlayerCredential,
    player_client::{PlayerAction, PlayerView},
};

#[derive(Debug, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerInboundMessage {
    /// Must be the first frame; may be repeated to switch identity.
    Identify {
        /// Player identifier returned by join.
        player_id: Uuid,
        /// Team the player joined.
        team_id: Uuid,
    },
    /// Toggle one grid item.
    Select {
        /// Identifier of the word in the grid.
        item_id: u32,
    },
    /// Re-send a submission that failed transiently.
    RetrySubmission,
    /// Forget the bound credential.
    Logout,
    /// Any frame type this server does not know; ignored.
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Parse one text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Credential carried by an `identify` frame.
    pub fn credential(&self) -> Option<PlayerCredential> {
        match self {
            Self::Identify { player_id, team_id } => Some(PlayerCredential {
                player_id: *player_id,
                team_id: *team_id,
            }),
            _ => None,
        }
    }

    /// Client action carried by the frame; `None` for unknown frames.
    pub fn into_action(self) -> Option<PlayerAction> {
        match self {
            Self::Identify { player_id, team_id } => Some(PlayerAction::Identify(PlayerCredential {
                player_id,
                team_id,
            })),
            Self::Select { item_id } => Some(PlayerAction::Select { item_id }),
            Self::RetrySubmission => Some(PlayerAction::RetrySubmission),
            Self::Logout => Some(PlayerAction::Logout),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerOutboundMessage {
    /// Full player read model, sent on every change.
    State {
        /// Current read model.
        view: PlayerView,
    },
    /// A frame could not be understood.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_player_frames() {
        let id = Uuid::new_v4();
        let identify = PlayerInboundMessage::from_json_str(&format!(
            r#"{{"type":"identify","player_id":"{id}","team_id":"{id}"}}"#
        ))
        .unwrap();
        assert_eq!(
            identify.credential(),
            Some(PlayerCredential {
                player_id: id,
                team_id: id
            })
        );

        let select = PlayerInboundMessage::from_json_str(r#"{"type":"select","item_id":7}"#).unwrap();
        assert_eq!(select.into_action(), Some(PlayerAction::Select { item_id: 7 }));

        let retry = PlayerInboundMessage::from_json_str(r#"{"type":"retry_submission"}"#).unwrap();
        assert_eq!(retry.into_action(), Some(PlayerAction::RetrySubmission));

        let unknown = PlayerInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap();
        assert_eq!(unknown, PlayerInboundMessage::Unknown);
        assert!(PlayerInboundMessage::from_json_str("not json").is_err());
    }
}
