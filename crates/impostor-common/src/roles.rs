use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Secret card dealt to a seat for one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "INOCENTE", alias = "INNOCENT")]
    Innocent,
    #[serde(rename = "IMPOSTOR")]
    Impostor,
}

impl Role {
    pub fn is_impostor(self) -> bool {
        matches!(self, Role::Impostor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("Invalid configuration: {innocent} innocents + {impostor} impostors does not fill {seats} seats")]
    SeatMismatch {
        seats: usize,
        innocent: usize,
        impostor: usize,
    },
    #[error("Invalid configuration: at least one seat is required")]
    NoSeats,
}

/// Deal `innocent_count` innocent and `impostor_count` impostor cards over
/// `seat_count` seats in uniformly random order. Position `i` of the result is
/// the card for seat `i`.
pub fn assign_roles(
    seat_count: usize,
    innocent_count: usize,
    impostor_count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<Role>, RoleError> {
    if seat_count == 0 {
        return Err(RoleError::NoSeats);
    }
    if innocent_count.checked_add(impostor_count) != Some(seat_count) {
        return Err(RoleError::SeatMismatch {
            seats: seat_count,
            innocent: innocent_count,
            impostor: impostor_count,
        });
    }

    let mut roles = Vec::with_capacity(seat_count);
    roles.extend(std::iter::repeat(Role::Innocent).take(innocent_count));
    roles.extend(std::iter::repeat(Role::Impostor).take(impostor_count));
    roles.shuffle(rng);
    Ok(roles)
}
