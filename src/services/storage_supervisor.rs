use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{quiz_store::QuizStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Backoff and polling parameters of the supervisor loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// First reconnect backoff.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Interval between health checks while healthy.
    pub health_poll: Duration,
    /// Failed checks tolerated before the store is dropped.
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            health_poll: HEALTH_POLL_INTERVAL,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Connect to the quiz store and keep the shared state in degraded mode while it is unavailable.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QuizStore>, StorageError>> + Send,
{
    run_with(state, SupervisorTimings::default(), connect).await
}

/// [`run`] with explicit timings.
pub async fn run_with<F, Fut>(state: SharedState, timings: SupervisorTimings, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn QuizStore>, StorageError>> + Send,
{
    let mut delay = timings.initial_delay;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("quiz store installed; leaving degraded mode");
                delay = timings.initial_delay;

                watch_health(&state, store.as_ref(), &timings).await;

                // Reconnects exhausted: drop the store so callers fail fast.
                state.clear_store().await;
                error!("quiz store lost; staying in degraded mode until a new connection succeeds");
                sleep(delay).await;
                delay = (delay * 2).min(timings.max_delay);
            }
            Err(err) => {
                warn!(error = %err, "quiz store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(timings.max_delay);
            }
        }
    }
}

/// Poll `store` until it stays unhealthy through every reconnect attempt.
async fn watch_health(state: &SharedState, store: &dyn QuizStore, timings: &SupervisorTimings) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded() {
                info!("quiz store healthy again; leaving degraded mode");
                state.update_degraded(false);
            }
            sleep(timings.health_poll).await;
            continue;
        }

        let mut reconnect_delay = timings.initial_delay;
        let mut reconnected = false;
        for attempt in 0..timings.max_reconnect_attempts {
            match store.try_reconnect().await {
                Ok(()) => {
                    info!(attempt, "quiz store reconnected after failed health check");
                    reconnected = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(attempt, error = %err, "quiz store reconnect failed; entering degraded mode");
                        state.update_degraded(true);
                    } else {
                        warn!(attempt, error = %err, "quiz store reconnect failed");
                    }
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(timings.max_delay);
                }
            }
        }

        if !reconnected {
            warn!("exhausted quiz store reconnect attempts");
            return;
        }
        state.update_degraded(false);
        sleep(timings.health_poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig, dao::quiz_store::memory::MemoryQuizStore, state::AppState,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;

    fn fast() -> SupervisorTimings {
        SupervisorTimings {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            health_poll: Duration::from_millis(5),
            max_reconnect_attempts: 2,
        }
    }

    #[tokio::test]
    async fn installs_store_after_failed_connections() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let store = MemoryQuizStore::new();

        let counter = attempts.clone();
        let task = tokio::spawn(run_with(state.clone(), fast(), move || {
            let counter = counter.clone();
            let store = store.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::unavailable(
                        "refused".into(),
                        std::io::Error::other("refused"),
                    ))
                } else {
                    Ok(Arc::new(store) as Arc<dyn QuizStore>)
                }
            }
        }));

        let mut degraded = state.degraded_watcher();
        timeout(Duration::from_secs(2), degraded.wait_for(|flag| !*flag))
            .await
            .unwrap()
            .unwrap();
        assert!(state.store().await.is_some());
        assert!(attempts.load(Ordering::SeqCst) >= 3);
        task.abort();
    }

    #[tokio::test]
    async fn outage_toggles_degraded_mode() {
        let store = MemoryQuizStore::new();
        let state = AppState::new(AppConfig::default());
        let handle = store.clone();
        let task = tokio::spawn(run_with(state.clone(), fast(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn QuizStore>) }
        }));

        let mut degraded = state.degraded_watcher();
        timeout(Duration::from_secs(2), degraded.wait_for(|flag| !*flag))
            .await
            .unwrap()
            .unwrap();

        handle.set_online(false);
        timeout(Duration::from_secs(2), degraded.wait_for(|flag| *flag))
            .await
            .unwrap()
            .unwrap();

        handle.set_online(true);
        timeout(Duration::from_secs(2), degraded.wait_for(|flag| !*flag))
            .await
            .unwrap()
            .unwrap();
        task.abort();
    }
}
