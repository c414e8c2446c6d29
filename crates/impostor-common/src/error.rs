use thiserror::Error;

use crate::protocol::ErrorCode;
use crate::roles::RoleError;

/// Reasons a room request is refused. None of these mutate room state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room {0} already exists")]
    RoomAlreadyExists(String),
    #[error("Room {0} not found")]
    RoomNotFound(String),
    #[error("The game has already started")]
    GameAlreadyStarted,
    #[error("Only the host can start the game")]
    NotHost,
    #[error("{0}")]
    InvalidConfiguration(#[from] RoleError),
    #[error("You are not in a room")]
    NotInRoom,
    #[error("You are already in room {0}")]
    AlreadyInRoom(String),
    #[error("Player name must not be empty")]
    InvalidName,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomAlreadyExists(_) => ErrorCode::RoomAlreadyExists,
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::GameAlreadyStarted => ErrorCode::GameAlreadyStarted,
            RoomError::NotHost => ErrorCode::NotHost,
            RoomError::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
            RoomError::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            RoomError::InvalidName => ErrorCode::InvalidName,
        }
    }
}
