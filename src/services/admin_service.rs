//! Business logic powering the admin REST routes. Session lifecycle goes
//! through the session controller; these helpers add request parsing and
//! the DTO projections.

use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        admin::{CategoriesResponse, CategoryItem, CreateSessionRequest, SessionScoresResponse},
        common::{SessionSummary, TeamSummary},
        parse_system_time,
    },
    error::ServiceError,
    services::{scoring_engine, session_controller},
    state::SharedState,
};

/// Every session of the served shard, newest planned start first.
pub async fn list_sessions(state: &SharedState) -> Result<Vec<SessionSummary>, ServiceError> {
    let shard = state.config().shard.clone();
    let sessions = session_controller::list_sessions(state, &shard).await?;
    Ok(sessions.iter().map(SessionSummary::from).collect())
}

/// Schedule a session in the served shard.
pub async fn create_session(
    state: &SharedState,
    payload: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let start_time = parse_system_time(&payload.start_time).ok_or_else(|| {
        ServiceError::Validation(format!("invalid start_time `{}`", payload.start_time))
    })?;
    ensure_known_categories(state, &payload.categories)?;

    let session = session_controller::create_session(
        state,
        state.config().shard.clone(),
        start_time,
        payload.categories,
        payload.window_secs,
    )
    .await?;
    Ok(SessionSummary::from(&session))
}

/// Reject categories the word bank cannot fill, before anything is written.
fn ensure_known_categories(state: &SharedState, categories: &[String]) -> Result<(), ServiceError> {
    let config = state.config();
    match categories
        .iter()
        .find(|category| config.word_bank.words(category.trim()).is_empty())
    {
        Some(unknown) => Err(ServiceError::Validation(format!(
            "unknown category `{}`",
            unknown.trim()
        ))),
        None => Ok(()),
    }
}

/// Start a scheduled session ahead of its planned time.
pub async fn start_session(state: &SharedState, id: Uuid) -> Result<SessionSummary, ServiceError> {
    let session = session_controller::start_session(state, id).await?;
    Ok(SessionSummary::from(&session))
}

/// Complete the active session.
pub async fn end_session(state: &SharedState, id: Uuid) -> Result<SessionSummary, ServiceError> {
    let session = session_controller::end_session(state, id).await?;
    Ok(SessionSummary::from(&session))
}

/// Delete a session no submission references.
pub async fn delete_session(state: &SharedState, id: Uuid) -> Result<(), ServiceError> {
    session_controller::delete_session(state, id).await?;
    Ok(())
}

/// Per-team totals of a session, recomputed from the store.
pub async fn session_scores(
    state: &SharedState,
    id: Uuid,
) -> Result<SessionScoresResponse, ServiceError> {
    let store = state.require_store().await?;
    if store.find_session(id).await?.is_none() {
        return Err(ServiceError::NotFound(format!("session `{id}` not found")));
    }
    let scores = scoring_engine::fetch_session_scores(state, id).await?;
    Ok(SessionScoresResponse {
        session_id: id,
        scores,
    })
}

/// Categories of the configured word bank.
pub fn list_categories(state: &SharedState) -> CategoriesResponse {
    let config = state.config();
    let categories = config
        .word_bank
        .categories()
        .map(|name| CategoryItem {
            name: name.to_owned(),
            word_count: config.word_bank.words(name).len(),
        })
        .collect();
    CategoriesResponse { categories }
}

/// Teams of the served shard, highest score first.
pub async fn list_teams(state: &SharedState) -> Result<Vec<TeamSummary>, ServiceError> {
    let store = state.require_store().await?;
    let mut teams = store.list_teams(state.config().shard.clone()).await?;
    // Stable sort keeps creation order among ties.
    teams.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(teams.iter().map(TeamSummary::from).collect())
}

/// Remove a team; its connected players are logged out by the change feed.
pub async fn delete_team(state: &SharedState, id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let removed = store
        .delete_team(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("team `{id}` not found")))?;
    info!(team_id = %id, name = %removed.name, "team deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::SessionStatus,
        services::test_support::{CATEGORIES, memory_state, team},
    };

    fn request(categories: &[&str]) -> CreateSessionRequest {
        CreateSessionRequest {
            start_time: "2030-01-01T18:00:00Z".into(),
            categories: categories.iter().map(|name| name.to_string()).collect(),
            window_secs: Some(90),
        }
    }

    #[tokio::test]
    async fn created_sessions_are_listed_and_driven() {
        let (state, _) = memory_state();
        let created = create_session(&state, request(&CATEGORIES)).await.unwrap();
        assert_eq!(created.status, SessionStatus::Scheduled);
        assert_eq!(created.window_secs, 90);
        assert_eq!(created.start_time, "2030-01-01T18:00:00Z");

        let started = start_session(&state, created.id).await.unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        let listed = list_sessions(&state).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SessionStatus::Active);

        let scores = session_scores(&state, created.id).await.unwrap();
        assert!(scores.scores.is_empty());
        assert!(matches!(
            session_scores(&state, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_categories_are_rejected_before_writing() {
        let (state, _) = memory_state();
        let result = create_session(
            &state,
            request(&["Programming Languages", "Databases", "Knitting", "Version Control"]),
        )
        .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(list_sessions(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn teams_are_ranked_and_deleted() {
        let (state, _) = memory_state();
        let owls = team(&state, "owls").await;
        let larks = team(&state, "larks").await;
        state
            .require_store()
            .await
            .unwrap()
            .increment_team_score(larks.id, 300)
            .await
            .unwrap();

        let ranked = list_teams(&state).await.unwrap();
        assert_eq!(ranked[0].id, larks.id);
        assert_eq!(ranked[1].id, owls.id);

        delete_team(&state, owls.id).await.unwrap();
        assert_eq!(list_teams(&state).await.unwrap().len(), 1);
        assert!(matches!(
            delete_team(&state, owls.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn categories_come_from_the_word_bank() {
        let (state, _) = memory_state();
        let listed = list_categories(&state);
        assert!(
            listed
                .categories
                .iter()
                .any(|category| category.name == CATEGORIES[0] && category.word_count >= 4)
        );
    }
}
