use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{PlayerInboundMessage, PlayerOutboundMessage},
    services::player_client::{PlayerClientError, PlayerClientHandle, PlayerView},
    state::{PlayerConnection, SharedState},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a player frame could not be handled.
#[derive(Debug, Error)]
enum FrameError {
    /// Writer channel closed - connection should be terminated immediately.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown frame type")]
    Unknown,
    #[error(transparent)]
    Client(#[from] PlayerClientError),
}

/// Handle the full lifecycle of one player WebSocket connection.
///
/// The first text frame must identify the player; the connection then drives
/// a player client and pushes its read model after every change.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("player identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let credential = match PlayerInboundMessage::from_json_str(&initial_message) {
        Ok(message) => message.credential(),
        Err(err) => {
            warn!(error = %err, "failed to parse player identification");
            None
        }
    };
    let Some(credential) = credential else {
        warn!("first message was not an identification");
        let _ = send_message(
            &outbound_tx,
            &PlayerOutboundMessage::Error {
                message: "first message must identify the player".into(),
            },
        );
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    info!(player_id = %credential.player_id, "player connected");
    let connection_id = Uuid::new_v4();
    let previous = state.register_player(
        credential.player_id,
        PlayerConnection {
            connection_id,
            tx: outbound_tx.clone(),
        },
    );
    if let Some(previous) = previous {
        debug!(player_id = %credential.player_id, "closing previous player socket");
        let _ = send_message(
            &previous.tx,
            &PlayerOutboundMessage::Error {
                message: "player connected from another socket".into(),
            },
        );
        let _ = previous.tx.send(Message::Close(None));
    }

    let client = PlayerClientHandle::spawn(state.clone(), Some(credential));
    let pusher = spawn_view_pusher(client.subscribe(), outbound_tx.clone());

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match handle_frame(&client, &text) {
                Ok(()) => {}
                Err(FrameError::ConnectionClosed) => break,
                Err(FrameError::Client(err)) => {
                    warn!(player_id = %credential.player_id, error = %err, "player client gone");
                    break;
                }
                Err(err) => {
                    debug!(player_id = %credential.player_id, error = %err, "rejected player frame");
                    let reply = PlayerOutboundMessage::Error {
                        message: err.to_string(),
                    };
                    if send_message(&outbound_tx, &reply).is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(player_id = %credential.player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.unregister_player(credential.player_id, connection_id);
    info!(player_id = %credential.player_id, "player disconnected");
    pusher.abort();
    let _ = pusher.await;
    client.shutdown().await;
    finalize(writer_task, outbound_tx).await;
}

fn handle_frame(client: &PlayerClientHandle, text: &str) -> Result<(), FrameError> {
    let action = PlayerInboundMessage::from_json_str(text)?
        .into_action()
        .ok_or(FrameError::Unknown)?;
    client.send(action)?;
    Ok(())
}

/// Push the current view, then every change, until the socket or the client goes away.
fn spawn_view_pusher(
    mut views: watch::Receiver<PlayerView>,
    outbound_tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    views.mark_changed();
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            if send_message(&outbound_tx, &PlayerOutboundMessage::State { view }).is_err() {
                break;
            }
        }
    })
}

/// Serialize a payload and push it onto the writer channel.
///
/// Serialization failures are logged and swallowed; a closed writer is reported.
fn send_message(
    tx: &mpsc::UnboundedSender<Message>,
    value: &PlayerOutboundMessage,
) -> Result<(), FrameError> {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize player message");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into()))
        .map_err(|_| FrameError::ConnectionClosed)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
