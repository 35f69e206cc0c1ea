use serde::Serialize;
use utoipa::ToSchema;

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
}

impl HealthResponse {
    /// Store reachable.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    /// Quiz store missing or failing its health checks.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
        }
    }
}
