//! Win arbitration. Only the authority compares star counts; everyone else
//! learns the result from the `EndGame` broadcast.

use starclash_core::net::messages::EndGameMsg;
use starclash_core::player::PlayerId;

/// Winner among players at or above `requirement`: most stars, then lowest id.
pub fn pick_winner(
    players: impl IntoIterator<Item = (PlayerId, u32)>,
    requirement: u32,
) -> Option<PlayerId> {
    players
        .into_iter()
        .filter(|&(_, stars)| stars >= requirement)
        .min_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
        .map(|(id, _)| id)
}

#[derive(Debug, Clone, Default)]
pub struct WinArbiter {
    star_requirement: u32,
    /// This participant already sent `EndGame`.
    announced: bool,
    game_over: bool,
    winner: Option<PlayerId>,
}

impl WinArbiter {
    pub fn new(star_requirement: u32) -> Self {
        Self {
            star_requirement,
            ..Default::default()
        }
    }

    pub fn star_requirement(&self) -> u32 {
        self.star_requirement
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Run one arbitration pass. Returns the announcement to broadcast, at
    /// most once per match and only on the authority.
    pub fn check(
        &mut self,
        is_authority: bool,
        players: impl IntoIterator<Item = (PlayerId, u32)>,
    ) -> Option<EndGameMsg> {
        if !is_authority || self.announced || self.game_over {
            return None;
        }
        let winner = pick_winner(players, self.star_requirement)?;
        self.announced = true;
        tracing::info!(winner, "Win condition reached");
        Some(EndGameMsg { winner })
    }

    /// Apply a received `EndGame`. Returns true the first time; later
    /// announcements are ignored.
    pub fn on_end_game(&mut self, msg: &EndGameMsg) -> bool {
        if self.game_over {
            if self.winner != Some(msg.winner) {
                tracing::warn!(
                    declared = ?self.winner,
                    ignored = msg.winner,
                    "Conflicting EndGame ignored"
                );
            }
            return false;
        }
        self.game_over = true;
        self.winner = Some(msg.winner);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(stars: &[u32]) -> Vec<(PlayerId, u32)> {
        stars
            .iter()
            .enumerate()
            .map(|(i, &s)| (i as PlayerId + 1, s))
            .collect()
    }

    #[test]
    fn single_crossing_announced_once() {
        let mut arbiter = WinArbiter::new(5);
        let msg = arbiter.check(true, roster(&[3, 5, 2]));
        assert_eq!(msg, Some(EndGameMsg { winner: 2 }));
        // Own broadcast has not looped back yet; still no second send.
        assert_eq!(arbiter.check(true, roster(&[3, 6, 2])), None);
        assert!(arbiter.on_end_game(&EndGameMsg { winner: 2 }));
        assert_eq!(arbiter.check(true, roster(&[9, 9, 9])), None);
        assert_eq!(arbiter.winner(), Some(2));
    }

    #[test]
    fn below_threshold_never_announces() {
        let mut arbiter = WinArbiter::new(5);
        for _ in 0..10 {
            assert_eq!(arbiter.check(true, roster(&[4, 4, 4])), None);
        }
        assert!(!arbiter.is_game_over());
    }

    #[test]
    fn non_authority_never_compares() {
        let mut arbiter = WinArbiter::new(5);
        assert_eq!(arbiter.check(false, roster(&[10, 0])), None);
    }

    #[test]
    fn simultaneous_crossing_tie_break() {
        assert_eq!(pick_winner(roster(&[5, 7, 6]), 5), Some(2));
        assert_eq!(pick_winner(roster(&[6, 3, 6]), 5), Some(1));
        assert_eq!(pick_winner(vec![(9, 6), (4, 6)], 5), Some(4));
        assert_eq!(pick_winner(Vec::new(), 5), None);
    }

    #[test]
    fn game_over_is_write_once() {
        let mut arbiter = WinArbiter::new(5);
        assert!(arbiter.on_end_game(&EndGameMsg { winner: 3 }));
        assert!(!arbiter.on_end_game(&EndGameMsg { winner: 1 }));
        assert_eq!(arbiter.winner(), Some(3));
        assert!(arbiter.is_game_over());
    }

    #[test]
    fn received_end_game_stops_authority_arbitration() {
        // A participant promoted to authority after the match ended.
        let mut arbiter = WinArbiter::new(5);
        arbiter.on_end_game(&EndGameMsg { winner: 1 });
        assert_eq!(arbiter.check(true, roster(&[0, 8])), None);
    }
}
