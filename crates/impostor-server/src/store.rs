use std::collections::HashMap;

use rand::Rng;
use uuid::Uuid;

use impostor_common::error::RoomError;
use impostor_common::protocol::GameConfig;

use crate::room::{Deal, Room};

const CODE_LEN: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Outcome of removing a player from a room.
pub enum Removal<'a> {
    Updated(&'a Room),
    /// The room became empty and is gone.
    Deleted,
    NotFound,
}

/// Room codes are case-insensitive: all lookups go through this.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Default)]
pub struct RoomStore {
    rooms: HashMap<String, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        code: &str,
        host_id: Uuid,
        host_name: String,
    ) -> Result<&Room, RoomError> {
        let code = normalize_code(code);
        if self.rooms.contains_key(&code) {
            return Err(RoomError::RoomAlreadyExists(code));
        }
        let room = Room::new(code.clone(), host_id, host_name);
        Ok(self.rooms.entry(code).or_insert(room))
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(&normalize_code(code))
    }

    pub fn add_player(
        &mut self,
        code: &str,
        player_id: Uuid,
        name: String,
    ) -> Result<&Room, RoomError> {
        let code = normalize_code(code);
        let room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::RoomNotFound(code))?;
        room.add_player(player_id, name)?;
        Ok(room)
    }

    pub fn remove_player(&mut self, code: &str, player_id: Uuid) -> Removal<'_> {
        let code = normalize_code(code);
        let Some(room) = self.rooms.get_mut(&code) else {
            return Removal::NotFound;
        };
        if !room.remove_player(player_id) {
            return Removal::NotFound;
        }
        if room.is_empty() {
            self.rooms.remove(&code);
            return Removal::Deleted;
        }
        match self.rooms.get(&code) {
            Some(room) => Removal::Updated(room),
            None => Removal::NotFound,
        }
    }

    pub fn start_game(
        &mut self,
        code: &str,
        caller_id: Uuid,
        config: &GameConfig,
        rng: &mut impl Rng,
    ) -> Result<Deal<'_>, RoomError> {
        let code = normalize_code(code);
        let room = self
            .rooms
            .get_mut(&code)
            .ok_or(RoomError::RoomNotFound(code))?;
        room.start_game(caller_id, config, rng)
    }

    /// Pick a random code no live room is using.
    pub fn generate_code(&self, rng: &mut impl Rng) -> String {
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
