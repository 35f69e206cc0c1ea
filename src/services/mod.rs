/// Admin REST helpers: sessions, teams and categories.
pub mod admin_service;
/// Per-admin live aggregation actor.
pub mod admin_view;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Player join and credential resume flow.
pub mod join_service;
/// Per-player session actor.
pub mod player_client;
/// Player onboarding and public read projections.
pub mod public_service;
/// Selection evaluation, scoring and submission recording.
pub mod scoring_engine;
/// Session lifecycle transitions and grid assembly.
pub mod session_controller;
/// Background promotion of due sessions.
pub mod session_scheduler;
/// Change feed to Server-Sent Events relay.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervisor with backoff and health polling.
pub mod storage_supervisor;
/// Player WebSocket connection handling.
pub mod websocket_service;

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use crate::{
        config::AppConfig,
        dao::{
            models::{SessionEntity, TeamEntity},
            quiz_store::memory::MemoryQuizStore,
        },
        services::session_controller,
        state::{AppState, SharedState},
    };

    pub const CATEGORIES: [&str; 4] = [
        "Programming Languages",
        "Frontend Frameworks",
        "Databases",
        "Version Control",
    ];

    /// Application state over a fresh in-memory store; the store handle drives outages.
    pub fn memory_state() -> (SharedState, MemoryQuizStore) {
        memory_state_with(AppConfig::default())
    }

    pub fn memory_state_with(config: AppConfig) -> (SharedState, MemoryQuizStore) {
        let store = MemoryQuizStore::new();
        let state = AppState::with_store(config, Arc::new(store.clone()));
        (state, store)
    }

    pub async fn scheduled_session(state: &SharedState) -> SessionEntity {
        session_controller::create_session(
            state,
            state.config().shard.clone(),
            SystemTime::now() + Duration::from_secs(3600),
            CATEGORIES.map(String::from).to_vec(),
            None,
        )
        .await
        .unwrap()
    }

    pub async fn active_session(state: &SharedState) -> SessionEntity {
        let session = scheduled_session(state).await;
        session_controller::start_session(state, session.id)
            .await
            .unwrap()
    }

    pub async fn team(state: &SharedState, name: &str) -> TeamEntity {
        state
            .require_store()
            .await
            .unwrap()
            .insert_team(TeamEntity::new(state.config().shard.clone(), name.into()))
            .await
            .unwrap()
    }
}
