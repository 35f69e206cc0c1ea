use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the installed quiz store and report the degraded flag.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "quiz store health check failed");
            }
        }
        None => warn!("no quiz store installed (degraded mode)"),
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, services::test_support::memory_state, state::AppState};

    #[tokio::test]
    async fn reports_degraded_without_store() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        let (state, _) = memory_state();
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
