use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use axum_valid::Valid;

use crate::{
    dto::player::{JoinRequest, PlayerSessionResponse, ResumeRequest},
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Player onboarding endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/players/join", post(join))
        .route("/players/resume", post(resume))
}

#[utoipa::path(
    post,
    path = "/players/join",
    tag = "player",
    request_body = JoinRequest,
    responses(
        (status = 201, description = "Player registered", body = PlayerSessionResponse),
        (status = 400, description = "Names shorter than two characters")
    )
)]
/// Register a player, creating the team when its name is new to the shard.
pub async fn join(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<(StatusCode, Json<PlayerSessionResponse>), AppError> {
    let joined = public_service::join(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(joined)))
}

#[utoipa::path(
    post,
    path = "/players/resume",
    tag = "player",
    request_body = ResumeRequest,
    responses(
        (status = 200, description = "Credential still valid", body = PlayerSessionResponse),
        (status = 401, description = "Unknown player or team")
    )
)]
/// Revalidate a credential kept by the client.
pub async fn resume(
    State(state): State<SharedState>,
    Json(payload): Json<ResumeRequest>,
) -> Result<Json<PlayerSessionResponse>, AppError> {
    Ok(Json(public_service::resume(&state, payload.into()).await?))
}
