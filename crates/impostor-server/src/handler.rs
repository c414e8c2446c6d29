use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use uuid::Uuid;

use impostor_common::error::RoomError;
use impostor_common::protocol::{ClientMessage, ErrorCode, GameConfig, ServerMessage};

use crate::connection::{ConnectionHandle, Session};
use crate::room::Room;
use crate::server::SharedState;
use crate::store::{self, Removal, RoomStore};

pub type Connections = HashMap<Uuid, ConnectionHandle>;

/// Everything one inbound event may touch. Built while holding the store and
/// connection locks, so each event runs to completion before the next.
pub struct Dispatch<'a> {
    pub store: &'a mut RoomStore,
    pub connections: &'a mut Connections,
    pub private_roles: bool,
}

pub async fn handle_message(connection_id: Uuid, msg: ClientMessage, state: &SharedState) {
    let mut store = state.store.write().await;
    let mut connections = state.connections.write().await;
    let mut rng = rand::rngs::StdRng::from_entropy();

    let mut dispatch = Dispatch {
        store: &mut *store,
        connections: &mut *connections,
        private_roles: state.private_roles,
    };
    dispatch.apply(connection_id, msg, &mut rng);
}

/// Report an undecodable frame to its sender.
pub async fn reject_malformed(connection_id: Uuid, reason: String, state: &SharedState) {
    let connections = state.connections.read().await;
    send_to_player(
        &connections,
        connection_id,
        ServerMessage::Error {
            code: ErrorCode::MalformedMessage,
            message: format!("Malformed message: {}", reason),
        },
    );
}

/// Drop the connection and, if it was seated somewhere, vacate the seat.
pub async fn handle_disconnect(connection_id: Uuid, state: &SharedState) {
    let mut store = state.store.write().await;
    let mut connections = state.connections.write().await;

    let mut dispatch = Dispatch {
        store: &mut *store,
        connections: &mut *connections,
        private_roles: state.private_roles,
    };
    dispatch.disconnect(connection_id);
}

impl Dispatch<'_> {
    pub fn apply(&mut self, connection_id: Uuid, msg: ClientMessage, rng: &mut impl Rng) {
        let result = match msg {
            ClientMessage::CreateRoom {
                room_code,
                host_name,
            } => self.create_room(connection_id, &room_code, &host_name, rng),
            ClientMessage::JoinRoom {
                room_code,
                player_name,
            } => self.join_room(connection_id, &room_code, &player_name),
            ClientMessage::StartGame { game_config } => {
                self.start_game(connection_id, &game_config, rng)
            }
            ClientMessage::LeaveRoom => self.leave_room(connection_id),
        };

        if let Err(e) = result {
            tracing::warn!("Rejected request from {}: {}", connection_id, e);
            send_to_player(
                self.connections,
                connection_id,
                ServerMessage::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            );
        }
    }

    /// Unregister a connection. Only the first call for a given id finds the
    /// handle, so the seat is vacated at most once.
    pub fn disconnect(&mut self, connection_id: Uuid) {
        let Some(handle) = self.connections.remove(&connection_id) else {
            return;
        };
        tracing::debug!("Connection {} unregistered", handle.connection_id);

        if let Some(session) = handle.session {
            self.vacate(session);
        }
    }

    fn create_room(
        &mut self,
        connection_id: Uuid,
        room_code: &str,
        host_name: &str,
        rng: &mut impl Rng,
    ) -> Result<(), RoomError> {
        self.ensure_unseated(connection_id)?;
        let host_name = validate_name(host_name)?;

        let code = if room_code.trim().is_empty() {
            self.store.generate_code(rng)
        } else {
            store::normalize_code(room_code)
        };

        let room = self.store.create(&code, connection_id, host_name)?;
        tracing::info!("Room {} created by '{}'", room.code, room.host);

        bind_session(self.connections, connection_id, &room.code);
        send_to_player(
            self.connections,
            connection_id,
            ServerMessage::RoomCreated(room.snapshot_for(Some(0), self.private_roles)),
        );
        broadcast_room(self.connections, room, self.private_roles);
        Ok(())
    }

    fn join_room(
        &mut self,
        connection_id: Uuid,
        room_code: &str,
        player_name: &str,
    ) -> Result<(), RoomError> {
        self.ensure_unseated(connection_id)?;
        let player_name = validate_name(player_name)?;

        let room = self.store.add_player(room_code, connection_id, player_name)?;
        tracing::info!(
            "Player {} joined room {} ({} players)",
            connection_id,
            room.code,
            room.players.len()
        );

        bind_session(self.connections, connection_id, &room.code);
        send_to_player(
            self.connections,
            connection_id,
            ServerMessage::RoomJoined(
                room.snapshot_for(room.seat_of(connection_id), self.private_roles),
            ),
        );
        broadcast_room(self.connections, room, self.private_roles);
        Ok(())
    }

    fn start_game(
        &mut self,
        connection_id: Uuid,
        config: &GameConfig,
        rng: &mut impl Rng,
    ) -> Result<(), RoomError> {
        let session = self.session_of(connection_id)?;

        let deal = self
            .store
            .start_game(&session.room_code, connection_id, config, rng)?;
        tracing::info!(
            "Game started in room {}: {} innocents, {} impostors",
            session.room_code,
            deal.data.innocent_count,
            deal.data.impostor_count
        );

        for (seat, player) in deal.players.iter().enumerate() {
            let data = if self.private_roles {
                deal.data.redacted_for(Some(seat))
            } else {
                deal.data.clone()
            };
            send_to_player(self.connections, player.id, ServerMessage::GameStarted(data));
        }
        Ok(())
    }

    fn leave_room(&mut self, connection_id: Uuid) -> Result<(), RoomError> {
        let session = self
            .connections
            .get_mut(&connection_id)
            .and_then(|c| c.session.take())
            .ok_or(RoomError::NotInRoom)?;
        self.vacate(session);
        Ok(())
    }

    /// Remove a seated player and tell whoever is left.
    fn vacate(&mut self, session: Session) {
        match self.store.remove_player(&session.room_code, session.player_id) {
            Removal::Updated(room) => {
                tracing::info!(
                    "Player {} left room {} (host is now '{}')",
                    session.player_id,
                    room.code,
                    room.host
                );
                broadcast_room(self.connections, room, self.private_roles);
            }
            Removal::Deleted => {
                tracing::info!("Room {} deleted", session.room_code);
            }
            Removal::NotFound => {
                tracing::warn!(
                    "Player {} had a session for missing room {}",
                    session.player_id,
                    session.room_code
                );
            }
        }
    }

    fn ensure_unseated(&self, connection_id: Uuid) -> Result<(), RoomError> {
        match self
            .connections
            .get(&connection_id)
            .and_then(|c| c.session.as_ref())
        {
            Some(session) => Err(RoomError::AlreadyInRoom(session.room_code.clone())),
            None => Ok(()),
        }
    }

    fn session_of(&self, connection_id: Uuid) -> Result<Session, RoomError> {
        self.connections
            .get(&connection_id)
            .and_then(|c| c.session.clone())
            .ok_or(RoomError::NotInRoom)
    }
}

fn bind_session(connections: &mut Connections, connection_id: Uuid, room_code: &str) {
    if let Some(conn) = connections.get_mut(&connection_id) {
        conn.session = Some(Session {
            room_code: room_code.to_string(),
            player_id: connection_id,
        });
    }
}

fn validate_name(name: &str) -> Result<String, RoomError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RoomError::InvalidName);
    }
    Ok(name.to_string())
}

fn send_to_player(connections: &Connections, player_id: Uuid, msg: ServerMessage) {
    if let Some(conn) = connections.get(&player_id) {
        let _ = conn.tx.send(msg);
    }
}

/// Send `roomUpdated` to every member, each with the view its seat may see.
fn broadcast_room(connections: &Connections, room: &Room, private_roles: bool) {
    if !private_roles || room.game_data.is_none() {
        broadcast_to_list(
            connections,
            &room.member_ids(),
            &ServerMessage::RoomUpdated(room.snapshot()),
        );
        return;
    }
    for (seat, player) in room.players.iter().enumerate() {
        send_to_player(
            connections,
            player.id,
            ServerMessage::RoomUpdated(room.snapshot_for(Some(seat), true)),
        );
    }
}

/// Queue a message for every listed member. Queuing happens under the store
/// lock, so all members see broadcasts in the order they were applied.
fn broadcast_to_list(connections: &Connections, member_ids: &[Uuid], msg: &ServerMessage) {
    for id in member_ids {
        if let Some(conn) = connections.get(id) {
            let _ = conn.tx.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impostor_common::protocol::{RoomSnapshot, RoomState};
    use impostor_common::roles::Role;
    use tokio::sync::mpsc;

    struct Harness {
        store: RoomStore,
        connections: Connections,
        inboxes: HashMap<Uuid, mpsc::UnboundedReceiver<ServerMessage>>,
        rng: rand::rngs::StdRng,
        private_roles: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: RoomStore::new(),
                connections: HashMap::new(),
                inboxes: HashMap::new(),
                rng: rand::rngs::StdRng::seed_from_u64(42),
                private_roles: false,
            }
        }

        fn connect(&mut self) -> Uuid {
            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            self.connections.insert(id, ConnectionHandle::new(id, tx));
            self.inboxes.insert(id, rx);
            id
        }

        fn send(&mut self, id: Uuid, msg: ClientMessage) {
            let mut dispatch = Dispatch {
                store: &mut self.store,
                connections: &mut self.connections,
                private_roles: self.private_roles,
            };
            dispatch.apply(id, msg, &mut self.rng);
        }

        fn disconnect(&mut self, id: Uuid) {
            let mut dispatch = Dispatch {
                store: &mut self.store,
                connections: &mut self.connections,
                private_roles: self.private_roles,
            };
            dispatch.disconnect(id);
        }

        fn drain(&mut self, id: Uuid) -> Vec<ServerMessage> {
            let rx = self.inboxes.get_mut(&id).unwrap();
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn create(&mut self, code: &str, name: &str) -> Uuid {
            let id = self.connect();
            self.send(
                id,
                ClientMessage::CreateRoom {
                    room_code: code.into(),
                    host_name: name.into(),
                },
            );
            id
        }

        fn join(&mut self, code: &str, name: &str) -> Uuid {
            let id = self.connect();
            self.send(
                id,
                ClientMessage::JoinRoom {
                    room_code: code.into(),
                    player_name: name.into(),
                },
            );
            id
        }
    }

    fn error_code(msgs: &[ServerMessage]) -> Option<ErrorCode> {
        msgs.iter().find_map(|m| match m {
            ServerMessage::Error { code, .. } => Some(*code),
            _ => None,
        })
    }

    fn last_update(msgs: &[ServerMessage]) -> Option<&RoomSnapshot> {
        msgs.iter().rev().find_map(|m| match m {
            ServerMessage::RoomUpdated(room) => Some(room),
            _ => None,
        })
    }

    #[test]
    fn test_create_room_replies_then_updates() {
        let mut h = Harness::new();
        let alice = h.create("abcd", "Alice");
        let msgs = h.drain(alice);
        assert_eq!(msgs.len(), 2);
        match (&msgs[0], &msgs[1]) {
            (ServerMessage::RoomCreated(created), ServerMessage::RoomUpdated(updated)) => {
                assert_eq!(created.code, "ABCD");
                assert_eq!(created.host, "Alice");
                assert_eq!(created.players.len(), 1);
                assert!(created.players[0].is_host);
                assert_eq!(created.players[0].id, alice);
                assert_eq!(created, updated);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_create_room_generates_code_when_blank() {
        let mut h = Harness::new();
        let alice = h.create("  ", "Alice");
        match &h.drain(alice)[0] {
            ServerMessage::RoomCreated(room) => {
                assert_eq!(room.code.len(), 6);
                assert!(h.store.get(&room.code).is_some());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_room_rejected_without_side_effects() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        h.drain(alice);
        let bob = h.create("R1", "Bob");

        assert_eq!(error_code(&h.drain(bob)), Some(ErrorCode::RoomAlreadyExists));
        assert!(h.drain(alice).is_empty());
        let room = h.store.get("R1").unwrap();
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[0].name, "Alice");
        assert!(h.connections[&bob].session.is_none());
    }

    #[test]
    fn test_join_broadcasts_to_everyone() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        h.drain(alice);
        let bob = h.join("r1", "Bob");

        let bob_msgs = h.drain(bob);
        assert!(matches!(&bob_msgs[0], ServerMessage::RoomJoined(r) if r.players.len() == 2));
        let alice_update = h.drain(alice);
        let room = last_update(&alice_update).unwrap();
        assert_eq!(room.players[1].name, "Bob");
        assert!(!room.players[1].is_host);
        assert_eq!(last_update(&bob_msgs), Some(room));
    }

    #[test]
    fn test_join_missing_room() {
        let mut h = Harness::new();
        let bob = h.join("NOPE", "Bob");
        assert_eq!(error_code(&h.drain(bob)), Some(ErrorCode::RoomNotFound));
        assert!(h.connections[&bob].session.is_none());
    }

    #[test]
    fn test_blank_name_rejected() {
        let mut h = Harness::new();
        let alice = h.create("R1", "   ");
        assert_eq!(error_code(&h.drain(alice)), Some(ErrorCode::InvalidName));
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_one_membership_per_connection() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        h.create("R2", "Bob");
        h.drain(alice);

        h.send(
            alice,
            ClientMessage::JoinRoom {
                room_code: "R2".into(),
                player_name: "Alice".into(),
            },
        );
        assert_eq!(error_code(&h.drain(alice)), Some(ErrorCode::AlreadyInRoom));
        assert_eq!(h.store.get("R2").unwrap().players.len(), 1);
    }

    #[test]
    fn test_start_without_room() {
        let mut h = Harness::new();
        let lone = h.connect();
        h.send(
            lone,
            ClientMessage::StartGame {
                game_config: GameConfig::new(1, 0),
            },
        );
        assert_eq!(error_code(&h.drain(lone)), Some(ErrorCode::NotInRoom));
    }

    #[test]
    fn test_non_host_start_rejected() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        h.drain(alice);
        h.drain(bob);

        h.send(
            bob,
            ClientMessage::StartGame {
                game_config: GameConfig::new(1, 1),
            },
        );
        assert_eq!(error_code(&h.drain(bob)), Some(ErrorCode::NotHost));
        assert!(h.drain(alice).is_empty());
        assert_eq!(h.store.get("R1").unwrap().state, RoomState::Waiting);
    }

    #[test]
    fn test_wrong_counts_rejected() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        h.drain(alice);
        h.drain(bob);

        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(3, 1),
            },
        );
        assert_eq!(
            error_code(&h.drain(alice)),
            Some(ErrorCode::InvalidConfiguration)
        );
        assert!(h.drain(bob).is_empty());
        assert_eq!(h.store.get("R1").unwrap().state, RoomState::Waiting);
    }

    #[test]
    fn test_start_game_reaches_every_member_once() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let others: Vec<Uuid> = ["Bob", "Carol", "Dave", "Eve"]
            .iter()
            .map(|n| h.join("R1", n))
            .collect();
        let mut everyone = vec![alice];
        everyone.extend(others);
        for id in &everyone {
            h.drain(*id);
        }

        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(4, 1),
            },
        );

        let mut deals = Vec::new();
        for id in &everyone {
            let msgs = h.drain(*id);
            assert_eq!(msgs.len(), 1);
            match &msgs[0] {
                ServerMessage::GameStarted(data) => deals.push(data.clone()),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert!(deals.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(deals[0].roles.len(), 5);
        assert_eq!(
            deals[0].roles.iter().filter(|r| **r == Some(Role::Impostor)).count(),
            1
        );
    }

    #[test]
    fn test_private_roles_only_reveal_own_seat() {
        let mut h = Harness::new();
        h.private_roles = true;
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        let carol = h.join("R1", "Carol");
        for id in [alice, bob, carol] {
            h.drain(id);
        }

        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(2, 1),
            },
        );

        let full = h.store.get("R1").unwrap().game_data.clone().unwrap();
        for (seat, id) in [alice, bob, carol].into_iter().enumerate() {
            match &h.drain(id)[0] {
                ServerMessage::GameStarted(data) => {
                    assert_eq!(data.role_of(seat), full.role_of(seat));
                    assert_eq!(data.roles.iter().filter(|r| r.is_some()).count(), 1);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_join_after_start_rejected() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(0, 1),
            },
        );
        h.drain(alice);

        let late = h.join("R1", "Late");
        assert_eq!(error_code(&h.drain(late)), Some(ErrorCode::GameAlreadyStarted));
        assert!(h.drain(alice).is_empty());
        assert_eq!(h.store.get("R1").unwrap().players.len(), 1);
    }

    #[test]
    fn test_host_disconnect_promotes_next() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        let carol = h.join("R1", "Carol");
        h.drain(bob);
        h.drain(carol);

        h.disconnect(alice);
        let msgs = h.drain(carol);
        let room = last_update(&msgs).unwrap();
        let names: Vec<&str> = room.players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Bob", "Carol"]);
        assert_eq!(room.host, "Bob");
        assert!(room.players[0].is_host);
        assert_eq!(last_update(&h.drain(bob)), Some(room));

        // Bob can now start.
        h.send(
            bob,
            ClientMessage::StartGame {
                game_config: GameConfig::new(1, 1),
            },
        );
        assert!(matches!(&h.drain(carol)[0], ServerMessage::GameStarted(_)));
    }

    #[test]
    fn test_last_disconnect_deletes_room() {
        let mut h = Harness::new();
        let carol = h.create("R1", "Carol");
        h.disconnect(carol);
        h.disconnect(carol);
        assert!(h.store.get("R1").is_none());
    }

    #[test]
    fn test_leave_room_unbinds_session() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        h.drain(alice);
        h.drain(bob);

        h.send(bob, ClientMessage::LeaveRoom);
        assert!(h.drain(bob).is_empty());
        assert_eq!(last_update(&h.drain(alice)).unwrap().players.len(), 1);
        assert!(h.connections[&bob].session.is_none());

        h.send(bob, ClientMessage::LeaveRoom);
        assert_eq!(error_code(&h.drain(bob)), Some(ErrorCode::NotInRoom));

        // Free to join elsewhere now.
        h.send(
            bob,
            ClientMessage::CreateRoom {
                room_code: "R2".into(),
                host_name: "Bob".into(),
            },
        );
        assert!(matches!(&h.drain(bob)[0], ServerMessage::RoomCreated(_)));
    }

    #[test]
    fn test_private_roles_survive_a_leave_after_start() {
        let mut h = Harness::new();
        h.private_roles = true;
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        let carol = h.join("R1", "Carol");
        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(2, 1),
            },
        );
        for id in [alice, bob, carol] {
            h.drain(id);
        }
        let full = h.store.get("R1").unwrap().game_data.clone().unwrap();

        h.disconnect(carol);

        for (seat, id) in [alice, bob].into_iter().enumerate() {
            let msgs = h.drain(id);
            let room = last_update(&msgs).unwrap();
            let data = room.game_data.as_ref().unwrap();
            assert_eq!(data.roles.iter().filter(|r| r.is_some()).count(), 1);
            assert_eq!(data.role_of(seat), full.role_of(seat));
        }
    }

    #[test]
    fn test_public_roles_stay_in_room_updates() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        let carol = h.join("R1", "Carol");
        h.send(
            alice,
            ClientMessage::StartGame {
                game_config: GameConfig::new(2, 1),
            },
        );
        h.drain(bob);

        h.send(carol, ClientMessage::LeaveRoom);
        let msgs = h.drain(bob);
        let data = last_update(&msgs).unwrap().game_data.as_ref().unwrap();
        assert!(data.roles.iter().all(Option::is_some));
    }

    #[test]
    fn test_second_disconnect_is_a_no_op() {
        let mut h = Harness::new();
        let alice = h.create("R1", "Alice");
        let bob = h.join("R1", "Bob");
        let carol = h.join("R1", "Carol");
        h.drain(alice);
        h.drain(carol);

        h.disconnect(bob);
        assert_eq!(h.drain(alice).len(), 1);
        assert_eq!(h.drain(carol).len(), 1);
        assert!(!h.connections.contains_key(&bob));

        h.disconnect(bob);
        assert!(h.drain(alice).is_empty());
        assert!(h.drain(carol).is_empty());
        assert_eq!(h.store.get("R1").unwrap().players.len(), 2);
    }
}
