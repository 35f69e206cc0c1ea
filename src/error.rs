use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::{Conflict, StorageError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input, rejected before any write.
    #[error("invalid input: {0}")]
    Validation(String),
    /// A store precondition or uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(Conflict),
    /// Referenced data is missing or insufficient.
    #[error("data error: {0}")]
    Data(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Storage backend is unavailable; safe to retry.
    #[error("storage unavailable")]
    Transient(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Transient(_) | ServiceError::Degraded | ServiceError::Timeout
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { .. } => ServiceError::Transient(err),
            StorageError::Conflict(conflict) => ServiceError::Conflict(conflict),
            StorageError::Missing { .. } => ServiceError::Data(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Request understood but the referenced data cannot satisfy it.
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::Conflict(conflict) => AppError::Conflict(conflict.to_string()),
            ServiceError::Data(message) => AppError::Unprocessable(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Transient(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{models::SessionStatus, quiz_store::memory::MemoryStoreError};
    use uuid::Uuid;

    #[test]
    fn storage_errors_map_to_service_taxonomy() {
        let unavailable = StorageError::unavailable("down".into(), MemoryStoreError::Offline);
        assert!(matches!(
            ServiceError::from(unavailable),
            ServiceError::Transient(_)
        ));

        let conflict = StorageError::from(Conflict::SessionNotActive {
            session_id: Uuid::new_v4(),
            status: SessionStatus::Completed,
        });
        assert!(matches!(
            ServiceError::from(conflict),
            ServiceError::Conflict(Conflict::SessionNotActive { .. })
        ));

        let missing = StorageError::missing("team", Uuid::new_v4());
        assert!(matches!(ServiceError::from(missing), ServiceError::Data(_)));
    }

    #[test]
    fn service_errors_pick_http_status() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Data("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ServiceError::Degraded, StatusCode::SERVICE_UNAVAILABLE),
            (
                ServiceError::Conflict(Conflict::DuplicateTeamName {
                    shard: "main".into(),
                    name: "owls".into(),
                }),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
