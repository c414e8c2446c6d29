use rand::Rng;
use uuid::Uuid;

use impostor_common::error::RoomError;
use impostor_common::protocol::{GameConfig, GameData, PlayerInfo, RoomSnapshot, RoomState};

/// A deal that just happened, together with the seats it was dealt to.
pub struct Deal<'a> {
    pub players: &'a [PlayerInfo],
    pub data: &'a GameData,
}

pub struct Room {
    pub code: String,
    /// Name of the player flagged `is_host`.
    pub host: String,
    /// Join order. A player's seat is its index here.
    pub players: Vec<PlayerInfo>,
    pub state: RoomState,
    pub game_data: Option<GameData>,
}

impl Room {
    pub fn new(code: String, host_id: Uuid, host_name: String) -> Self {
        Self {
            code,
            host: host_name.clone(),
            players: vec![PlayerInfo {
                id: host_id,
                name: host_name,
                is_host: true,
                is_ready: true,
            }],
            state: RoomState::Waiting,
            game_data: None,
        }
    }

    pub fn add_player(&mut self, player_id: Uuid, name: String) -> Result<(), RoomError> {
        if self.state != RoomState::Waiting {
            return Err(RoomError::GameAlreadyStarted);
        }
        if !self.contains(player_id) {
            self.players.push(PlayerInfo {
                id: player_id,
                name,
                is_host: false,
                is_ready: true,
            });
        }
        Ok(())
    }

    /// Remove a player. If the host left, the oldest remaining member takes over.
    /// Returns false when the player was not in the room.
    pub fn remove_player(&mut self, player_id: Uuid) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != player_id);
        if self.players.len() == before {
            return false;
        }

        if !self.players.iter().any(|p| p.is_host) {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
                self.host = next.name.clone();
            }
        }
        true
    }

    pub fn start_game(
        &mut self,
        caller_id: Uuid,
        config: &GameConfig,
        rng: &mut impl Rng,
    ) -> Result<Deal<'_>, RoomError> {
        if !self.is_host(caller_id) {
            return Err(RoomError::NotHost);
        }
        if self.state != RoomState::Waiting {
            return Err(RoomError::GameAlreadyStarted);
        }

        let data = GameData::deal(config, self.players.len(), rng)?;
        self.state = RoomState::Playing;
        let data = self.game_data.insert(data);
        Ok(Deal {
            players: &self.players,
            data,
        })
    }

    pub fn is_host(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id && p.is_host)
    }

    pub fn contains(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn seat_of(&self, player_id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.id == player_id)
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Get all member IDs in seat order for broadcasting.
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.code.clone(),
            code: self.code.clone(),
            host: self.host.clone(),
            players: self.players.clone(),
            game_state: self.state,
            game_data: self.game_data.clone(),
        }
    }

    /// The snapshot `seat` is allowed to see. With private roles every other
    /// seat's role is blanked out of the game data.
    pub fn snapshot_for(&self, seat: Option<usize>, private_roles: bool) -> RoomSnapshot {
        let mut snapshot = self.snapshot();
        if private_roles {
            snapshot.game_data = self.game_data.as_ref().map(|d| d.redacted_for(seat));
        }
        snapshot
    }
}
