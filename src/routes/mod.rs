use axum::Router;

use crate::state::SharedState;

/// Token-protected admin endpoints.
pub mod admin;
/// Swagger UI and OpenAPI JSON.
pub mod docs;
/// Liveness and storage health.
pub mod health;
/// Player join and resume.
pub mod player;
/// Public leaderboard and schedule.
pub mod public;
/// Public and admin event streams.
pub mod sse;
/// Player WebSocket upgrade.
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(player::router())
        .merge(public::router())
        .merge(sse::router())
        .merge(websocket::router())
        .merge(admin::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_state;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    #[tokio::test]
    async fn join_validates_names_and_creates_teams() {
        let (state, _) = memory_state();
        let app = router(state);

        let rejected = app
            .clone()
            .oneshot(post_json(
                "/players/join",
                r#"{"player_name":"A","team_name":"Owls"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let created = app
            .clone()
            .oneshot(post_json(
                "/players/join",
                r#"{"player_name":"Ada","team_name":"Owls"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let board = app
            .oneshot(
                Request::builder()
                    .uri("/public/leaderboard")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(board.status(), StatusCode::OK);
        let body = to_bytes(board.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["teams"][0]["name"], "Owls");
        assert_eq!(json["teams"][0]["player_count"], 1);
    }

    #[tokio::test]
    async fn degraded_mode_answers_service_unavailable() {
        let (state, _) = memory_state();
        state.clear_store().await;
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/public/sessions/next")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
