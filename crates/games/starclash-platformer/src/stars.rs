//! Big star spawning. The authority picks spawn points; everyone else
//! follows the `SpawnStar` / `CollectStar` events.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use starclash_core::clock::{SimClock, TickTimer};
use starclash_core::net::messages::SpawnStarMsg;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarConfig {
    /// Delay between a star being collected and the next one appearing.
    pub respawn_secs: f32,
    /// A spawn point with a player closer than this is skipped for the tick.
    pub camp_radius: f32,
    pub seed: u64,
}

impl Default for StarConfig {
    fn default() -> Self {
        Self {
            respawn_secs: 15.0,
            camp_radius: 4.0,
            seed: 0x5747_4152,
        }
    }
}

#[derive(Debug)]
pub struct StarSpawner {
    config: StarConfig,
    rng: StdRng,
    spawns: Vec<(f32, f32)>,
    /// Spawn indices not used since the last refill.
    remaining: Vec<u32>,
    countdown: TickTimer,
    current: Option<u32>,
}

impl StarSpawner {
    pub fn new(spawns: Vec<(f32, f32)>, config: StarConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            spawns,
            remaining: Vec::new(),
            countdown: TickTimer::NONE,
            current: None,
        }
    }

    /// Spawn index of the star currently in play.
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn remaining(&self) -> &[u32] {
        &self.remaining
    }

    /// Authority step. Returns a star to announce when the countdown has run
    /// out and the chosen spawn point is not camped.
    pub fn tick(&mut self, clock: &SimClock, players: &[(f32, f32)]) -> Option<SpawnStarMsg> {
        if self.current.is_some() || self.spawns.is_empty() {
            return None;
        }
        if self.countdown.expires_at().is_none() {
            self.countdown = TickTimer::from_secs(clock, self.config.respawn_secs);
        }
        if self.countdown.is_running(clock) {
            return None;
        }

        if self.remaining.is_empty() {
            self.remaining = (0..self.spawns.len() as u32).collect();
        }
        let pick = self.rng.random_range(0..self.remaining.len());
        let index = self.remaining[pick];
        let (x, y) = self.spawns[index as usize];
        let radius_sq = self.config.camp_radius * self.config.camp_radius;
        if players
            .iter()
            .any(|&(px, py)| (px - x).powi(2) + (py - y).powi(2) < radius_sq)
        {
            tracing::trace!(index, "Star spawn camped, retrying next tick");
            return None;
        }

        self.remaining.swap_remove(pick);
        self.current = Some(index);
        self.countdown = TickTimer::NONE;
        tracing::debug!(index, x, y, "Spawning star");
        Some(SpawnStarMsg {
            spawn_index: index,
            x,
            y,
        })
    }

    /// Apply a `SpawnStar` received from the authority.
    pub fn on_spawn(&mut self, msg: &SpawnStarMsg) {
        self.current = Some(msg.spawn_index);
        self.countdown = TickTimer::NONE;
        self.remaining.retain(|&i| i != msg.spawn_index);
    }

    /// Apply a `CollectStar`: the star leaves play and the countdown restarts.
    pub fn on_collect(&mut self) {
        self.current = None;
        self.countdown = TickTimer::NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawns() -> Vec<(f32, f32)> {
        vec![(0.0, 0.0), (20.0, 0.0), (40.0, 0.0)]
    }

    fn config() -> StarConfig {
        StarConfig {
            respawn_secs: 1.0,
            camp_radius: 4.0,
            seed: 7,
        }
    }

    #[test]
    fn waits_for_countdown() {
        let mut clock = SimClock::new(10);
        let mut spawner = StarSpawner::new(spawns(), config());
        for _ in 0..10 {
            assert!(spawner.tick(&clock, &[]).is_none());
            clock.advance();
        }
        let star = spawner.tick(&clock, &[]).unwrap();
        assert_eq!(spawner.current(), Some(star.spawn_index));
        assert_eq!(spawner.remaining().len(), 2);
        // No second star while one is in play.
        clock.advance();
        assert!(spawner.tick(&clock, &[]).is_none());
    }

    #[test]
    fn camped_spawns_are_skipped() {
        let mut clock = SimClock::new(10);
        let mut spawner = StarSpawner::new(spawns(), config());
        spawner.tick(&clock, &[]);
        for _ in 0..10 {
            clock.advance();
        }
        // A player on every spawn point blocks spawning entirely.
        let campers = spawns();
        for _ in 0..20 {
            assert!(spawner.tick(&clock, &campers).is_none());
            clock.advance();
        }
        assert!(spawner.current().is_none());
        assert!(spawner.tick(&clock, &[(100.0, 100.0)]).is_some());
    }

    #[test]
    fn pool_refills_after_every_spawn_used() {
        let mut clock = SimClock::new(10);
        let mut spawner = StarSpawner::new(spawns(), config());
        let mut seen = Vec::new();
        while seen.len() < 3 {
            if let Some(star) = spawner.tick(&clock, &[]) {
                seen.push(star.spawn_index);
                spawner.on_collect();
            }
            clock.advance();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(spawner.remaining().is_empty());
        while spawner.current().is_none() {
            spawner.tick(&clock, &[]);
            clock.advance();
        }
        assert_eq!(spawner.remaining().len(), 2);
    }

    #[test]
    fn follower_tracks_authority_events() {
        let mut spawner = StarSpawner::new(spawns(), config());
        spawner.on_spawn(&SpawnStarMsg {
            spawn_index: 1,
            x: 20.0,
            y: 0.0,
        });
        assert_eq!(spawner.current(), Some(1));
        spawner.on_collect();
        assert_eq!(spawner.current(), None);
    }

    #[test]
    fn no_spawn_points_never_spawns() {
        let clock = SimClock::starting_at(1000, 10);
        let mut spawner = StarSpawner::new(Vec::new(), config());
        assert!(spawner.tick(&clock, &[]).is_none());
    }
}
