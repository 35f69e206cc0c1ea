//! DTO definitions used by the admin REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::{validate_categories, validate_rfc3339},
    services::scoring_engine::TeamSessionScore,
};

/// Payload scheduling a new session in the served shard.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Planned start (RFC 3339); the scheduler starts the session once it is due.
    #[validate(custom(function = "validate_rfc3339"))]
    pub start_time: String,
    /// Exactly four distinct category names from the word bank.
    #[validate(custom(function = "validate_categories"))]
    pub categories: Vec<String>,
    /// Countdown per attempt; defaults to the configured rules.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub window_secs: Option<u32>,
}

/// Per-team totals of one session, rebuilt from its submissions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionScoresResponse {
    /// Session the totals belong to.
    pub session_id: Uuid,
    /// Totals, highest score first.
    pub scores: Vec<TeamSessionScore>,
}

/// A word bank category an admin can pick for a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryItem {
    /// Category name.
    pub name: String,
    /// Words available in the category.
    pub word_count: usize,
}

/// Categories known to the word bank, in configuration order.
#[derive(Debug, Serialize, ToSchema)]
pub struct CategoriesResponse {
    /// Known categories.
    pub categories: Vec<CategoryItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> CreateSessionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn create_session_request_is_validated() {
        let valid = request(
            r#"{"start_time":"2025-05-01T18:00:00Z","categories":["A","B","C","D"]}"#,
        );
        assert!(valid.validate().is_ok());
        assert_eq!(valid.window_secs, None);

        let zero_window = request(
            r#"{"start_time":"2025-05-01T18:00:00Z","categories":["A","B","C","D"],"window_secs":0}"#,
        );
        assert!(zero_window.validate().is_err());

        let errors = request(r#"{"start_time":"soon","categories":["A","B"]}"#)
            .validate()
            .unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("start_time"));
        assert!(fields.contains_key("categories"));
    }
}
