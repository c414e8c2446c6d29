use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, Semaphore};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::{OriginPolicy, ServerConfig};
use crate::connection::{self, ConnectionHandle};
use crate::store::RoomStore;

pub struct ServerState {
    pub store: RwLock<RoomStore>,
    pub connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    pub max_connections: usize,
    /// One permit per open connection, held until its socket task ends.
    pub connection_slots: Arc<Semaphore>,
    pub private_roles: bool,
    pub origins: OriginPolicy,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            store: RwLock::new(RoomStore::new()),
            connections: RwLock::new(HashMap::new()),
            max_connections: config.max_connections,
            connection_slots: Arc::new(Semaphore::new(config.max_connections)),
            private_roles: config.private_roles,
            origins: config.origin_policy()?,
        })
    }
}

pub fn router(state: SharedState) -> Router {
    let cors = state.origins.cors_layer();
    Router::new()
        .route("/", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, config).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> anyhow::Result<()> {
    let state: SharedState = Arc::new(ServerState::new(&config)?);
    tracing::info!(
        "Listening on {} (max {} connections, private roles: {})",
        listener.local_addr()?,
        state.max_connections,
        state.private_roles
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let rooms = state.store.read().await.len();
    Json(json!({
        "message": "Impostor game server running",
        "rooms": rooms,
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> Response {
    if !state.origins.allows(headers.get(header::ORIGIN)) {
        tracing::warn!("Rejecting connection from origin {:?}", headers.get(header::ORIGIN));
        return StatusCode::FORBIDDEN.into_response();
    }

    // Reserve the slot before upgrading so concurrent handshakes cannot overshoot.
    let Ok(permit) = state.connection_slots.clone().try_acquire_owned() else {
        tracing::warn!(
            "Rejecting connection (max {} reached)",
            state.max_connections
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state, permit))
}
