use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        admin::{CategoriesResponse, CreateSessionRequest, SessionScoresResponse},
        common::{SessionSummary, TeamSummary},
    },
    error::AppError,
    services::admin_service,
    state::{AdminTokenCheck, SharedState},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Admin-only endpoints for scheduling and driving sessions.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/sessions", get(list_sessions).post(create_session))
        .route("/admin/sessions/{id}", delete(delete_session))
        .route("/admin/sessions/{id}/start", post(start_session))
        .route("/admin/sessions/{id}/end", post(end_session))
        .route("/admin/sessions/{id}/scores", get(get_session_scores))
        .route("/admin/categories", get(list_categories))
        .route("/admin/teams", get(list_teams))
        .route("/admin/teams/{id}", delete(delete_team))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Retrieve every session of the served shard.
#[utoipa::path(
    get,
    path = "/admin/sessions",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses((status = 200, description = "Sessions, newest start first", body = [SessionSummary]))
)]
pub async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    Ok(Json(admin_service::list_sessions(&state).await?))
}

/// Schedule a new session.
#[utoipa::path(
    post,
    path = "/admin/sessions",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session scheduled", body = SessionSummary),
        (status = 400, description = "Invalid categories, window or start time")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionSummary>), AppError> {
    let session = admin_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Start a scheduled session ahead of its planned time.
#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/start",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the session to start")),
    responses(
        (status = 200, description = "Session started", body = SessionSummary),
        (status = 409, description = "Session is not scheduled or another one is active")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(admin_service::start_session(&state, id).await?))
}

/// Complete an active session; later submissions are rejected.
#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/end",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the session to end")),
    responses(
        (status = 200, description = "Session completed", body = SessionSummary),
        (status = 409, description = "Session is not active")
    )
)]
pub async fn end_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(admin_service::end_session(&state, id).await?))
}

/// Delete a session no submission references.
#[utoipa::path(
    delete,
    path = "/admin/sessions/{id}",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the session to delete")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 409, description = "Session is referenced by submissions")
    )
)]
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admin_service::delete_session(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Rebuild the per-team totals of a session from its submissions.
#[utoipa::path(
    get,
    path = "/admin/sessions/{id}/scores",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the session")),
    responses((status = 200, description = "Per-team session totals", body = SessionScoresResponse))
)]
pub async fn get_session_scores(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionScoresResponse>, AppError> {
    Ok(Json(admin_service::session_scores(&state, id).await?))
}

/// List the word bank categories available to new sessions.
#[utoipa::path(
    get,
    path = "/admin/categories",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses((status = 200, description = "Word bank categories", body = CategoriesResponse))
)]
pub async fn list_categories(State(state): State<SharedState>) -> Json<CategoriesResponse> {
    Json(admin_service::list_categories(&state))
}

/// Retrieve the teams of the served shard.
#[utoipa::path(
    get,
    path = "/admin/teams",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream")),
    responses((status = 200, description = "Teams, highest score first", body = [TeamSummary]))
)]
pub async fn list_teams(
    State(state): State<SharedState>,
) -> Result<Json<Vec<TeamSummary>>, AppError> {
    Ok(Json(admin_service::list_teams(&state).await?))
}

/// Delete a team; its connected players are logged out.
#[utoipa::path(
    delete,
    path = "/admin/teams/{id}",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
    ("id" = String, Path, description = "Identifier of the team to delete")),
    responses((status = 204, description = "Team deleted"))
)]
pub async fn delete_team(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admin_service::delete_team(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    match state.check_admin_token(&provided).await {
        AdminTokenCheck::Valid => Ok(next.run(req).await),
        AdminTokenCheck::Mismatch => Err(AppError::Unauthorized("invalid admin token".into())),
        AdminTokenCheck::NotIssued => Err(AppError::Unauthorized(
            "admin SSE stream not initialised yet".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_state;
    use tower::ServiceExt;

    fn request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/admin/teams");
        if let Some(token) = token {
            builder = builder.header("X-Admin-Token", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admin_routes_require_the_issued_token() {
        let (state, _) = memory_state();
        let app = router(state.clone()).with_state(state.clone());

        let missing = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        let early = app.clone().oneshot(request(Some("guess"))).await.unwrap();
        assert_eq!(early.status(), StatusCode::UNAUTHORIZED);

        let token = state.claim_admin_token().await.unwrap();
        let wrong = app.clone().oneshot(request(Some("guess"))).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        let ok = app.oneshot(request(Some(&token))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
