use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// SSE-specific sub-state carved out from [`super::AppState`].
pub struct SseState {
    public: SseHub,
    admin: SseHub,
    admin_token: Mutex<Option<String>>,
}

impl SseState {
    /// Build the SSE sub-tree with per-stream channel capacities.
    pub fn new(public_capacity: usize, admin_capacity: usize) -> Self {
        Self {
            public: SseHub::new(public_capacity),
            admin: SseHub::new(admin_capacity),
            admin_token: Mutex::new(None),
        }
    }

    pub fn public(&self) -> &SseHub {
        &self.public
    }

    pub fn admin(&self) -> &SseHub {
        &self.admin
    }

    /// Issue the admin token, failing when another admin stream holds it.
    pub async fn claim_admin_token(&self) -> Option<String> {
        let mut guard = self.admin_token.lock().await;
        if guard.is_some() {
            return None;
        }
        let token = Uuid::new_v4().simple().to_string();
        *guard = Some(token.clone());
        Some(token)
    }

    /// Forget the admin token so the next admin stream negotiates a fresh one.
    pub async fn release_admin_token(&self) {
        self.admin_token.lock().await.take();
    }

    /// Compare `provided` with the issued admin token.
    pub async fn check_admin_token(&self, provided: &str) -> AdminTokenCheck {
        match self.admin_token.lock().await.as_deref() {
            Some(token) if token == provided => AdminTokenCheck::Valid,
            Some(_) => AdminTokenCheck::Mismatch,
            None => AdminTokenCheck::NotIssued,
        }
    }
}

/// Result of an admin token comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTokenCheck {
    /// The header matches the issued token.
    Valid,
    /// A token was issued but the header differs.
    Mismatch,
    /// No admin stream is connected.
    NotIssued,
}

/// Broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Hub buffering `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// New receiver starting at the next event.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admin_token_is_exclusive_until_released() {
        let sse = SseState::new(4, 4);
        assert_eq!(sse.check_admin_token("x").await, AdminTokenCheck::NotIssued);

        let token = sse.claim_admin_token().await.unwrap();
        assert!(sse.claim_admin_token().await.is_none());
        assert_eq!(sse.check_admin_token(&token).await, AdminTokenCheck::Valid);
        assert_eq!(sse.check_admin_token("x").await, AdminTokenCheck::Mismatch);

        sse.release_admin_token().await;
        assert!(sse.claim_admin_token().await.is_some());
    }
}
