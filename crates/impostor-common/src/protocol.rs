use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::roles::{self, Role, RoleError};

/// Keys of `GameData` that preset fields coming from the host may not shadow.
const RESERVED_GAME_KEYS: [&str; 4] = [
    "innocentCount",
    "impostorCount",
    "roles",
    "currentPlayerIndex",
];

// -- Client -> Server Messages --

/// Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// An empty `room_code` asks the server to pick one.
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        #[serde(default)]
        room_code: String,
        host_name: String,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        player_name: String,
    },
    #[serde(rename_all = "camelCase")]
    StartGame { game_config: GameConfig },
    LeaveRoom,
}

// -- Server -> Client Messages --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent to the creator only.
    RoomCreated(RoomSnapshot),
    /// Sent to the joiner only.
    RoomJoined(RoomSnapshot),
    /// Sent to every member on any membership or host change.
    RoomUpdated(RoomSnapshot),
    /// Sent to every member exactly once per game.
    GameStarted(GameData),
    /// Sent to the originating connection only.
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    RoomAlreadyExists,
    RoomNotFound,
    GameAlreadyStarted,
    NotHost,
    InvalidConfiguration,
    NotInRoom,
    AlreadyInRoom,
    InvalidName,
    MalformedMessage,
}

// -- Room state --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Waiting,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub is_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: String,
    pub code: String,
    pub host: String,
    pub players: Vec<PlayerInfo>,
    pub game_state: RoomState,
    pub game_data: Option<GameData>,
}

impl RoomSnapshot {
    /// Seat index of a player, i.e. its position in join order.
    pub fn seat_of(&self, player_id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.id == player_id)
    }

    pub fn host_player(&self) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.is_host)
    }
}

// -- Game setup --

/// Settings chosen by the host. Unknown fields (preset name, word lists, ...)
/// are carried through to `GameData` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub innocent_count: usize,
    pub impostor_count: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GameConfig {
    pub fn new(innocent_count: usize, impostor_count: usize) -> Self {
        Self {
            innocent_count,
            impostor_count,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameData {
    pub innocent_count: usize,
    pub impostor_count: usize,
    /// One entry per seat. `None` only in copies redacted for a single seat.
    pub roles: Vec<Option<Role>>,
    pub current_player_index: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GameData {
    /// Deal roles for `seat_count` seats according to `config`.
    pub fn deal(
        config: &GameConfig,
        seat_count: usize,
        rng: &mut impl Rng,
    ) -> Result<Self, RoleError> {
        let roles = roles::assign_roles(
            seat_count,
            config.innocent_count,
            config.impostor_count,
            rng,
        )?;

        let mut extra = config.extra.clone();
        for key in RESERVED_GAME_KEYS {
            extra.remove(key);
        }

        Ok(Self {
            innocent_count: config.innocent_count,
            impostor_count: config.impostor_count,
            roles: roles.into_iter().map(Some).collect(),
            current_player_index: 0,
            extra,
        })
    }

    pub fn role_of(&self, seat: usize) -> Option<Role> {
        self.roles.get(seat).copied().flatten()
    }

    /// Copy with every role except `seat`'s blanked out.
    pub fn redacted_for(&self, seat: Option<usize>) -> Self {
        let roles = self
            .roles
            .iter()
            .enumerate()
            .map(|(i, r)| if Some(i) == seat { *r } else { None })
            .collect();
        Self {
            roles,
            ..self.clone()
        }
    }
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &str,
) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}
