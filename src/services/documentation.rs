use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Codections Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::player::join,
        crate::routes::player::resume,
        crate::routes::public::get_leaderboard,
        crate::routes::public::get_next_session,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::list_sessions,
        crate::routes::admin::create_session,
        crate::routes::admin::start_session,
        crate::routes::admin::end_session,
        crate::routes::admin::delete_session,
        crate::routes::admin::get_session_scores,
        crate::routes::admin::list_categories,
        crate::routes::admin::list_teams,
        crate::routes::admin::delete_team,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::common::SessionSummary,
            crate::dto::common::TeamSummary,
            crate::dto::admin::CreateSessionRequest,
            crate::dto::admin::SessionScoresResponse,
            crate::dto::admin::CategoriesResponse,
            crate::dto::player::JoinRequest,
            crate::dto::player::ResumeRequest,
            crate::dto::player::PlayerSessionResponse,
            crate::dto::player::LeaderboardResponse,
            crate::dto::player::NextSessionResponse,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::TeamChangedEvent,
            crate::dto::sse::TeamDeletedEvent,
            crate::dto::sse::SessionChangedEvent,
            crate::dto::sse::SessionDeletedEvent,
            crate::dto::sse::ResyncEvent,
            crate::services::admin_view::leaderboard::AdminSnapshot,
            crate::dao::models::SessionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "player", description = "Player onboarding and the player WebSocket"),
        (name = "public", description = "Read-only leaderboard and schedule"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "admin", description = "Session scheduling and team management"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/players/join",
            "/ws/player",
            "/admin/sessions/{id}/scores",
            "/public/sessions/next",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
