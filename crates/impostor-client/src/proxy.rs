//! Client side of the room protocol.
//!
//! [`RoomProxy`] owns one WebSocket to the server. Requests that expect a
//! direct answer (`create_room`, `join_room`) resolve on the first
//! `roomCreated`/`roomJoined`/`error` that follows them. Everything else the
//! server pushes is delivered to whoever called [`RoomProxy::subscribe`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use impostor_common::protocol::{
    self, ClientMessage, ErrorCode, GameConfig, GameData, RoomSnapshot, ServerMessage,
};
use impostor_common::roles::Role;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("connection error: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("{message}")]
    Server { code: ErrorCode, message: String },
    #[error("not in a room")]
    NotInRoom,
    #[error("another request is still waiting for an answer")]
    RequestInFlight,
    #[error("disconnected from server")]
    Disconnected,
}

/// Pushed updates for the room this client is in.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    RoomUpdated(RoomSnapshot),
    GameStarted(GameData),
    /// A rejection that did not belong to a pending request (e.g. `startGame`).
    Error { code: ErrorCode, message: String },
    Disconnected,
}

type Pending = oneshot::Sender<Result<RoomSnapshot, ProxyError>>;

#[derive(Default)]
struct ProxyState {
    pending: Option<Pending>,
    subscriber: Option<mpsc::UnboundedSender<RoomEvent>>,
    current_room: Option<RoomSnapshot>,
    player_id: Option<Uuid>,
    role: Option<Role>,
    connected: bool,
}

impl ProxyState {
    fn emit(&mut self, event: RoomEvent) {
        if let Some(sub) = &self.subscriber {
            if sub.send(event).is_err() {
                self.subscriber = None;
            }
        }
    }

    /// Hand `result` to the waiting request. Returns false if nobody was waiting.
    fn resolve(&mut self, result: Result<RoomSnapshot, ProxyError>) -> bool {
        match self.pending.take() {
            Some(pending) => {
                let _ = pending.send(result);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::RoomCreated(room) | ServerMessage::RoomJoined(room) => {
                // The snapshot is taken right after we were seated, so we are last.
                self.player_id = room.players.last().map(|p| p.id);
                self.current_room = Some(room.clone());
                self.role = None;
                self.resolve(Ok(room));
            }
            ServerMessage::RoomUpdated(room) => {
                let ours = self
                    .current_room
                    .as_ref()
                    .is_some_and(|current| current.code == room.code);
                if ours {
                    self.current_room = Some(room.clone());
                    self.emit(RoomEvent::RoomUpdated(room));
                }
            }
            ServerMessage::GameStarted(data) => {
                self.role = match (&self.current_room, self.player_id) {
                    (Some(room), Some(id)) => role_for(room, &data, id),
                    _ => None,
                };
                self.emit(RoomEvent::GameStarted(data));
            }
            ServerMessage::Error { code, message } => {
                let claimed = self.resolve(Err(ProxyError::Server {
                    code,
                    message: message.clone(),
                }));
                if !claimed {
                    self.emit(RoomEvent::Error { code, message });
                }
            }
        }
    }

    fn close(&mut self) {
        self.connected = false;
        self.resolve(Err(ProxyError::Disconnected));
        self.emit(RoomEvent::Disconnected);
        self.subscriber = None;
    }
}

/// Find `player_id`'s seat in `room` and read that seat's card from `data`.
pub fn role_for(room: &RoomSnapshot, data: &GameData, player_id: Uuid) -> Option<Role> {
    room.seat_of(player_id).and_then(|seat| data.role_of(seat))
}

pub struct RoomProxy {
    tx: mpsc::UnboundedSender<Message>,
    state: Arc<Mutex<ProxyState>>,
}

impl RoomProxy {
    /// Open a connection to `url` (e.g. `ws://127.0.0.1:3001/ws`).
    pub async fn connect(url: &str) -> Result<Self, ProxyError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let state = Arc::new(Mutex::new(ProxyState {
            connected: true,
            ..ProxyState::default()
        }));

        // Writer task: rx -> socket sink
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        // Reader task: socket stream -> proxy state
        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match protocol::deserialize_message::<ServerMessage>(&text) {
                    Ok(msg) => reader_state.lock().await.apply(msg),
                    Err(e) => tracing::warn!("Failed to parse server message: {}", e),
                }
            }
            reader_state.lock().await.close();
        });

        Ok(Self { tx, state })
    }

    pub async fn create_room(
        &self,
        room_code: &str,
        host_name: &str,
    ) -> Result<RoomSnapshot, ProxyError> {
        self.request(ClientMessage::CreateRoom {
            room_code: room_code.to_string(),
            host_name: host_name.to_string(),
        })
        .await
    }

    pub async fn join_room(
        &self,
        room_code: &str,
        player_name: &str,
    ) -> Result<RoomSnapshot, ProxyError> {
        self.request(ClientMessage::JoinRoom {
            room_code: room_code.to_string(),
            player_name: player_name.to_string(),
        })
        .await
    }

    /// Ask the server to deal. Rejections arrive as [`RoomEvent::Error`].
    pub async fn start_game(&self, game_config: GameConfig) -> Result<(), ProxyError> {
        if self.state.lock().await.current_room.is_none() {
            return Err(ProxyError::NotInRoom);
        }
        self.send(&ClientMessage::StartGame { game_config })
    }

    pub async fn leave_room(&self) -> Result<(), ProxyError> {
        let mut state = self.state.lock().await;
        if state.current_room.take().is_none() {
            return Err(ProxyError::NotInRoom);
        }
        state.role = None;
        drop(state);
        self.send(&ClientMessage::LeaveRoom)
    }

    /// Start receiving room events, replacing any earlier subscription.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<RoomEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        if !state.connected {
            let _ = tx.send(RoomEvent::Disconnected);
        } else {
            state.subscriber = Some(tx);
        }
        rx
    }

    pub async fn unsubscribe(&self) {
        self.state.lock().await.subscriber = None;
    }

    pub async fn current_room(&self) -> Option<RoomSnapshot> {
        self.state.lock().await.current_room.clone()
    }

    pub async fn player_id(&self) -> Option<Uuid> {
        self.state.lock().await.player_id
    }

    /// This client's card for the game in progress, if one has been dealt.
    pub async fn my_role(&self) -> Option<Role> {
        self.state.lock().await.role
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Close the socket. The server treats this as leaving the room.
    pub fn disconnect(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    async fn request(&self, msg: ClientMessage) -> Result<RoomSnapshot, ProxyError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(ProxyError::Disconnected);
            }
            if state.pending.is_some() {
                return Err(ProxyError::RequestInFlight);
            }
            state.pending = Some(tx);
        }
        if let Err(e) = self.send(&msg) {
            self.state.lock().await.pending = None;
            return Err(e);
        }
        rx.await.map_err(|_| ProxyError::Disconnected)?
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ProxyError> {
        let text = protocol::serialize_message(msg).map_err(|e| {
            tracing::error!("Failed to serialize client message: {}", e);
            ProxyError::Disconnected
        })?;
        self.tx
            .send(Message::Text(text))
            .map_err(|_| ProxyError::Disconnected)
    }
}
