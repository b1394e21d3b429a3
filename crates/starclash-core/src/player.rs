use serde::{Deserialize, Serialize};

/// Unique identifier for a participant. A participant controls exactly one
/// player agent, which shares its id.
pub type PlayerId = u64;

/// A roster entry supplied by the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub is_spectator: bool,
}

impl Player {
    pub fn new(id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_spectator: false,
        }
    }
}
