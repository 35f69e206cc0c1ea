use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    PlayerEntity, SessionEntity, SessionStatus, SubmissionEntity, TeamEntity,
};

pub const SESSION_COLLECTION: &str = "sessions";
pub const TEAM_COLLECTION: &str = "teams";
pub const PLAYER_COLLECTION: &str = "players";
pub const SUBMISSION_COLLECTION: &str = "submissions";

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::MalformedId {
        collection,
        id: raw.to_owned(),
        source,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    shard: String,
    status: SessionStatus,
    start_time: DateTime,
    started_at: Option<DateTime>,
    end_time: Option<DateTime>,
    categories: Vec<String>,
    window_secs: u32,
    #[serde(default)]
    submission_count: u32,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            shard: value.shard,
            status: value.status,
            start_time: DateTime::from_system_time(value.start_time),
            started_at: value.started_at.map(DateTime::from_system_time),
            end_time: value.end_time.map(DateTime::from_system_time),
            categories: value.categories,
            window_secs: value.window_secs,
            submission_count: value.submission_count,
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SESSION_COLLECTION, &value.id)?,
            shard: value.shard,
            status: value.status,
            start_time: value.start_time.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            end_time: value.end_time.map(DateTime::to_system_time),
            categories: value.categories,
            window_secs: value.window_secs,
            submission_count: value.submission_count,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTeamDocument {
    #[serde(rename = "_id")]
    id: String,
    shard: String,
    name: String,
    score: i64,
    #[serde(default)]
    player_count: u32,
    created_at: DateTime,
}

impl From<TeamEntity> for MongoTeamDocument {
    fn from(value: TeamEntity) -> Self {
        Self {
            id: value.id.to_string(),
            shard: value.shard,
            name: value.name,
            score: value.score,
            player_count: value.player_count,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoTeamDocument> for TeamEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoTeamDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(TEAM_COLLECTION, &value.id)?,
            shard: value.shard,
            name: value.name,
            score: value.score,
            player_count: value.player_count,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    team_id: String,
    created_at: DateTime,
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id.to_string(),
            name: value.name,
            team_id: value.team_id.to_string(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoPlayerDocument> for PlayerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPlayerDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(PLAYER_COLLECTION, &value.id)?,
            name: value.name,
            team_id: parse_id(PLAYER_COLLECTION, &value.team_id)?,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSubmissionDocument {
    #[serde(rename = "_id")]
    id: String,
    player_id: String,
    team_id: String,
    session_id: String,
    is_correct: bool,
    score: i64,
    submitted_at: DateTime,
}

impl From<SubmissionEntity> for MongoSubmissionDocument {
    fn from(value: SubmissionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            player_id: value.player_id.to_string(),
            team_id: value.team_id.to_string(),
            session_id: value.session_id.to_string(),
            is_correct: value.is_correct,
            score: value.score,
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl TryFrom<MongoSubmissionDocument> for SubmissionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSubmissionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SUBMISSION_COLLECTION, &value.id)?,
            player_id: parse_id(SUBMISSION_COLLECTION, &value.player_id)?,
            team_id: parse_id(SUBMISSION_COLLECTION, &value.team_id)?,
            session_id: parse_id(SUBMISSION_COLLECTION, &value.session_id)?,
            is_correct: value.is_correct,
            score: value.score,
            submitted_at: value.submitted_at.to_system_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn session_document_round_trips_through_string_id() {
        let start = UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let session = SessionEntity::scheduled(
            "main".into(),
            start,
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            60,
        );
        let document: MongoSessionDocument = session.clone().into();
        assert_eq!(document.id, session.id.to_string());
        assert_eq!(document.status, SessionStatus::Scheduled);

        let restored = SessionEntity::try_from(document).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn malformed_identifier_is_reported() {
        let document = MongoTeamDocument {
            id: "not-a-uuid".into(),
            shard: "main".into(),
            name: "owls".into(),
            score: 0,
            player_count: 0,
            created_at: DateTime::from_system_time(SystemTime::now()),
        };
        assert!(matches!(
            TeamEntity::try_from(document),
            Err(MongoDaoError::MalformedId { collection: TEAM_COLLECTION, .. })
        ));
    }
}
