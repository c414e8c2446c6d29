use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use uuid::Uuid;

use impostor_common::protocol::{self, ClientMessage, ServerMessage, serialize_message};

use crate::handler;
use crate::server::SharedState;

/// The room membership a connection currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub room_code: String,
    pub player_id: Uuid,
}

pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub session: Option<Session>,
}

impl ConnectionHandle {
    pub fn new(connection_id: Uuid, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            connection_id,
            tx,
            session: None,
        }
    }
}

/// Run one client socket to completion. `_slot` is released when this returns.
pub async fn handle_connection(
    socket: WebSocket,
    state: SharedState,
    _slot: OwnedSemaphorePermit,
) {
    let connection_id = Uuid::new_v4();

    // Outbound queue. Unbounded so the handler can enqueue while holding the
    // store lock without waiting on a slow peer.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state
        .connections
        .write()
        .await
        .insert(connection_id, ConnectionHandle::new(connection_id, tx));
    tracing::info!("Connection {} opened", connection_id);

    let (mut sink, mut stream) = socket.split();

    // Writer task: drains rx and writes to sink
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serialize_message(&msg) {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    // Reader loop
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                tracing::debug!("Frame from {}: {}", connection_id, text);
                match protocol::deserialize_message::<ClientMessage>(&text) {
                    Ok(msg) => handler::handle_message(connection_id, msg, &state).await,
                    Err(e) => {
                        tracing::warn!("Failed to parse message from {}: {}", connection_id, e);
                        handler::reject_malformed(connection_id, e.to_string(), &state).await;
                    }
                }
            }
            Some(Ok(Message::Close(_))) => {
                tracing::info!("Connection {} closed by peer", connection_id);
                break;
            }
            // Ping/pong are answered by axum; binary frames are not part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!("Read error from {}: {}", connection_id, e);
                break;
            }
            None => {
                tracing::info!("Connection {} dropped", connection_id);
                break;
            }
        }
    }

    handler::handle_disconnect(connection_id, &state).await;
    write_task.abort();
}
