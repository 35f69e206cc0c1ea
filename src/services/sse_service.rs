use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::{
        admin_view::AdminViewHandle,
        sse_events::{EVENT_HANDSHAKE, admin_snapshot_event},
    },
    state::SharedState,
};

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

/// Open the shared public stream, greeting the client with a handshake.
pub fn open_public_stream(state: &SharedState) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let receiver = state.public_sse().subscribe();
    let handshake = handshake(state, "public", "public stream connected", None);
    let (tx, stream) = event_channel();

    tokio::spawn(async move {
        if let Some(handshake) = handshake {
            if tx.send(Ok(to_event(handshake))).await.is_err() {
                return;
            }
        }
        forward_hub(receiver, &tx).await;
        info!("public SSE stream disconnected");
    });

    stream
}

/// Open the single admin stream: issue the admin token, then push hub events
/// and a fresh admin snapshot whenever the aggregation view changes.
pub async fn open_admin_stream(
    state: &SharedState,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let token = state.claim_admin_token().await.ok_or_else(|| {
        ServiceError::Unauthorized("Another admin SSE stream is already active".into())
    })?;
    let receiver = state.admin_sse().subscribe();
    let view = AdminViewHandle::spawn(state.clone());
    let handshake = handshake(state, "admin", "admin stream connected", Some(token));
    let (tx, stream) = event_channel();
    let state = state.clone();

    tokio::spawn(async move {
        if let Some(handshake) = handshake {
            let _ = tx.send(Ok(to_event(handshake))).await;
        }
        forward_admin(receiver, &view, &tx).await;

        view.shutdown().await;
        // Free the slot even if the request context has already dropped.
        state.release_admin_token().await;
        info!("admin SSE stream disconnected");
    });

    Ok(stream)
}

fn event_channel() -> (EventSender, Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>) {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    (tx, sse)
}

fn handshake(
    state: &SharedState,
    stream: &str,
    message: &str,
    token: Option<String>,
) -> Option<ServerEvent> {
    ServerEvent::json(
        EVENT_HANDSHAKE.to_string(),
        &Handshake {
            stream: stream.into(),
            message: message.into(),
            degraded: state.is_degraded(),
            token,
        },
    )
    .inspect_err(|err| warn!(error = %err, "failed to serialise handshake"))
    .ok()
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Forward hub events until the client goes away.
async fn forward_hub(mut receiver: broadcast::Receiver<ServerEvent>, tx: &EventSender) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            recv_result = receiver.recv() => match recv_result {
                Ok(payload) => {
                    if tx.send(Ok(to_event(payload))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
                // Skip lagged messages but keep the stream alive.
                Err(RecvError::Lagged(_)) => continue,
            },
        }
    }
}

async fn forward_admin(
    mut receiver: broadcast::Receiver<ServerEvent>,
    view: &AdminViewHandle,
    tx: &EventSender,
) {
    let mut snapshots = view.subscribe();
    // The first snapshot goes out as soon as the view is loaded.
    snapshots.mark_changed();

    loop {
        let payload = tokio::select! {
            _ = tx.closed() => break,
            recv_result = receiver.recv() => match recv_result {
                Ok(payload) => Some(payload),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                admin_snapshot_event(&snapshot)
            }
        };
        if let Some(payload) = payload {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_state;

    #[tokio::test]
    async fn admin_stream_is_exclusive_until_dropped() {
        let (state, _) = memory_state();
        let first = open_admin_stream(&state).await;
        assert!(first.is_ok());
        assert!(matches!(
            open_admin_stream(&state).await,
            Err(ServiceError::Unauthorized(_))
        ));

        drop(first);
        let mut released = false;
        for _ in 0..100 {
            if state.claim_admin_token().await.is_some() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);
    }
}
