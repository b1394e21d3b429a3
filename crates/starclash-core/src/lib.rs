pub mod clock;
pub mod net;
pub mod player;
pub mod replicated;
pub mod room;
pub mod schedule;
pub mod tile;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::net::messages::MatchEvent;
    use crate::net::protocol::{decode_event, encode_event};
    use crate::net::relay::Frame;
    use crate::player::{Player, PlayerId};
    use crate::room::MatchConfig;

    /// Create `n` test players with sequential IDs starting at 1.
    pub fn make_players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| Player::new(i as PlayerId + 1, format!("Player{}", i + 1)))
            .collect()
    }

    /// Match config with the given star requirement and short delays at 10 Hz,
    /// so lifecycle tests finish in a handful of ticks.
    pub fn default_match_config(star_requirement: u32) -> MatchConfig {
        MatchConfig {
            star_requirement,
            tick_rate_hz: 10,
            activation_delay_secs: 0.5,
            end_game_delay_secs: 1.0,
            ..MatchConfig::default()
        }
    }

    /// Wrap an event in a frame as if `sender` had sent it.
    pub fn frame_from(sender: PlayerId, from_authority: bool, event: &MatchEvent) -> Frame {
        Frame {
            sender,
            from_authority,
            bytes: encode_event(event).expect("test event should encode"),
        }
    }

    /// Decode every frame, panicking on malformed ones.
    pub fn decode_frames(frames: &[Frame]) -> Vec<MatchEvent> {
        frames
            .iter()
            .map(|f| decode_event(&f.bytes).expect("frame should decode"))
            .collect()
    }
}
