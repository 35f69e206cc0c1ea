use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Public SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream team and session changes to spectators.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New public SSE connection");
    sse_service::open_public_stream(&state)
}

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    responses(
        (status = 200, description = "Admin SSE stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Another admin stream is already active")
    )
)]
/// Stream admin snapshots, issuing the admin token in the handshake.
pub async fn admin_stream(
    State(state): State<SharedState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = sse_service::open_admin_stream(&state).await?;
    info!("New admin SSE connection");
    Ok(stream)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/public", get(public_stream))
        .route("/sse/admin", get(admin_stream))
}
