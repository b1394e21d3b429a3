use serde::{Deserialize, Serialize};

use crate::clock::DEFAULT_TICK_RATE_HZ;

/// Per-match settings fixed when the match starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub max_players: u8,
    /// Stars needed to win the match.
    pub star_requirement: u32,
    pub tick_rate_hz: u32,
    /// Delay between loading completing and players being activated.
    pub activation_delay_secs: f32,
    /// Delay between the win announcement and leaving the match.
    pub end_game_delay_secs: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_players: 10,
            star_requirement: 10,
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            activation_delay_secs: 3.5,
            end_game_delay_secs: 5.0,
        }
    }
}

/// Coarse phase of a match as seen by one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Waiting for every participant to finish loading.
    Loading,
    /// Loaded, counting down to player activation.
    Starting,
    InProgress,
    GameOver,
}
