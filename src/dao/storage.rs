use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::SessionStatus;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached; the operation may be retried.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What the backend was doing.
        message: String,
        /// Backend-specific cause.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A write precondition or uniqueness constraint rejected the operation.
    #[error("storage conflict: {0}")]
    Conflict(Conflict),
    /// A row referenced by the operation does not exist.
    #[error("{entity} `{id}` not found")]
    Missing {
        /// Kind of row, such as `team`.
        entity: &'static str,
        /// Identifier that was looked up.
        id: Uuid,
    },
}

/// Why the store refused a write. Conflicts are never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    /// A submission already exists for this (player, session) pair.
    #[error("player `{player_id}` already submitted for session `{session_id}`")]
    DuplicateSubmission {
        /// Submitting player.
        player_id: Uuid,
        /// Session submitted to.
        session_id: Uuid,
    },
    /// The session was not active when the submission was written.
    #[error("session `{session_id}` is {status}, submissions are closed")]
    SessionNotActive {
        /// Session submitted to.
        session_id: Uuid,
        /// Status found at write time.
        status: SessionStatus,
    },
    /// A conditional status update found a different prior status.
    #[error("session `{session_id}` is {actual}, expected {expected}")]
    StatusMismatch {
        /// Session being transitioned.
        session_id: Uuid,
        /// Status the update required.
        expected: SessionStatus,
        /// Status actually stored.
        actual: SessionStatus,
    },
    /// Another session of the same shard is already active. `active_id` is
    /// `None` when the backend rejected the write but the winner was gone by
    /// the time it looked.
    #[error("shard `{shard}` already has an active session{}", active_suffix(.active_id))]
    ActiveSessionExists {
        /// Shard holding the active session.
        shard: String,
        /// The session already running, when still found.
        active_id: Option<Uuid>,
    },
    /// The session still has submissions pointing at it.
    #[error("session `{session_id}` is referenced by {submissions} submission(s)")]
    SessionReferenced {
        /// Session that was to be deleted.
        session_id: Uuid,
        /// Submissions recorded against it.
        submissions: u32,
    },
    /// A team with this name already exists in the shard.
    #[error("team name `{name}` is already taken in shard `{shard}`")]
    DuplicateTeamName {
        /// Shard the name is taken in.
        shard: String,
        /// Requested name.
        name: String,
    },
}

fn active_suffix(active_id: &Option<Uuid>) -> String {
    active_id.map_or_else(String::new, |id| format!(" (`{id}`)"))
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a missing-row error.
    pub fn missing(entity: &'static str, id: Uuid) -> Self {
        StorageError::Missing { entity, id }
    }
}

impl From<Conflict> for StorageError {
    fn from(conflict: Conflict) -> Self {
        StorageError::Conflict(conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_session_conflict_names_the_winner_when_known() {
        let id = Uuid::new_v4();
        let known = Conflict::ActiveSessionExists {
            shard: "lab".into(),
            active_id: Some(id),
        };
        assert_eq!(
            known.to_string(),
            format!("shard `lab` already has an active session (`{id}`)")
        );

        let vanished = Conflict::ActiveSessionExists {
            shard: "lab".into(),
            active_id: None,
        };
        assert_eq!(
            vanished.to_string(),
            "shard `lab` already has an active session"
        );
    }
}
