//! Shared application state: store slot, change bus, SSE hubs and player connections.

pub mod bus;
pub mod session_machine;
mod sse;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::quiz_store::{QuizStore, notifying::NotifyingStore},
    error::ServiceError,
};

pub use self::sse::{AdminTokenCheck, SseHub};
use self::{bus::EventBus, sse::SseState};

/// Handle shared by every route and task.
pub type SharedState = Arc<AppState>;

const SSE_CAPACITY: usize = 64;

/// Live player WebSocket: the connection identifier and its writer channel.
pub struct PlayerConnection {
    /// Identifier of this socket, used to detect replacement.
    pub connection_id: Uuid,
    /// Writer channel of the socket.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: the installed store, the change feed and stream hubs.
///
/// Per-client state lives in the player and admin actors, never here.
pub struct AppState {
    store: RwLock<Option<Arc<dyn QuizStore>>>,
    bus: Arc<EventBus>,
    config: Arc<AppConfig>,
    sse: SseState,
    players: DashMap<Uuid, PlayerConnection>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Arc::new(Self::build(config, None))
    }

    /// Construct a state with `backend` already installed.
    pub fn with_store(config: AppConfig, backend: Arc<dyn QuizStore>) -> SharedState {
        Arc::new(Self::build(config, Some(backend)))
    }

    fn build(config: AppConfig, backend: Option<Arc<dyn QuizStore>>) -> Self {
        let bus = Arc::new(EventBus::new(config.bus_capacity));
        let store = backend.map(|backend| Self::wrap(backend, &bus));
        let (degraded_tx, _rx) = watch::channel(store.is_none());
        Self {
            store: RwLock::new(store),
            bus,
            config: Arc::new(config),
            sse: SseState::new(SSE_CAPACITY, SSE_CAPACITY),
            players: DashMap::new(),
            degraded: degraded_tx,
        }
    }

    fn wrap(backend: Arc<dyn QuizStore>, bus: &Arc<EventBus>) -> Arc<dyn QuizStore> {
        Arc::new(NotifyingStore::new(backend, bus.clone()))
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn QuizStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn QuizStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a backend (wrapped so its writes reach the change feed) and leave degraded mode.
    pub async fn install_store(&self, backend: Arc<dyn QuizStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(Self::wrap(backend, &self.bus));
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Change feed fed by the notifying store.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Register the socket of `player_id`, returning the one it replaces.
    pub fn register_player(
        &self,
        player_id: Uuid,
        connection: PlayerConnection,
    ) -> Option<PlayerConnection> {
        self.players.insert(player_id, connection)
    }

    /// Forget the socket of `player_id` unless a newer connection took over.
    pub fn unregister_player(&self, player_id: Uuid, connection_id: Uuid) {
        self.players
            .remove_if(&player_id, |_, current| current.connection_id == connection_id);
    }

    /// Number of players with a live socket.
    pub fn connected_players(&self) -> usize {
        self.players.len()
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin()
    }

    /// Issue the single admin token; `None` while another admin stream holds it.
    pub async fn claim_admin_token(&self) -> Option<String> {
        self.sse.claim_admin_token().await
    }

    /// Forget the admin token when the admin stream disconnects.
    pub async fn release_admin_token(&self) {
        self.sse.release_admin_token().await;
    }

    /// Compare a header value with the issued admin token.
    pub async fn check_admin_token(&self, provided: &str) -> AdminTokenCheck {
        self.sse.check_admin_token(provided).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::quiz_store::memory::MemoryQuizStore;

    #[tokio::test]
    async fn degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_store().await,
            Err(ServiceError::Degraded)
        ));

        state.install_store(Arc::new(MemoryQuizStore::new())).await;
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
        assert!(state.require_store().await.is_ok());

        state.clear_store().await;
        assert!(state.is_degraded());
    }

    #[tokio::test]
    async fn with_store_starts_healthy() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryQuizStore::new()));
        assert!(!state.is_degraded());
        assert!(state.store().await.is_some());
    }

    #[test]
    fn newer_player_connection_survives_stale_unregister() {
        let state = AppState::new(AppConfig::default());
        let player_id = Uuid::new_v4();
        let (first_tx, _first_rx) = mpsc::unbounded_channel();
        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(
            state
                .register_player(player_id, PlayerConnection { connection_id: first, tx: first_tx })
                .is_none()
        );
        let replaced = state
            .register_player(player_id, PlayerConnection { connection_id: second, tx: second_tx })
            .unwrap();
        assert_eq!(replaced.connection_id, first);

        state.unregister_player(player_id, first);
        assert_eq!(state.connected_players(), 1);
        state.unregister_player(player_id, second);
        assert_eq!(state.connected_players(), 0);
    }
}
