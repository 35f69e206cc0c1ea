use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::player::{LeaderboardResponse, NextSessionResponse},
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Public read-only endpoints for spectators and waiting players.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/public/leaderboard", get(get_leaderboard))
        .route("/public/sessions/next", get(get_next_session))
}

#[utoipa::path(
    get,
    path = "/public/leaderboard",
    tag = "public",
    responses((status = 200, description = "Teams ranked by score", body = LeaderboardResponse))
)]
/// Return the teams of the shard, highest score first.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let payload = public_service::get_leaderboard(&state).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/public/sessions/next",
    tag = "public",
    responses((status = 200, description = "Running or upcoming session", body = NextSessionResponse))
)]
/// Return the running session, or the next one players are waiting for.
pub async fn get_next_session(
    State(state): State<SharedState>,
) -> Result<Json<NextSessionResponse>, AppError> {
    let payload = public_service::get_next_session(&state).await?;
    Ok(Json(payload))
}
