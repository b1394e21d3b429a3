use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::mpsc;

use starclash_core::net::protocol::encode_outgoing;
use starclash_core::net::relay::{LocalRelay, RelayError};
use starclash_core::player::{Player, PlayerId};
use starclash_core::replicated::EntityRef;
use starclash_core::room::MatchPhase;
use starclash_core::tile::{InteractionDirection, Tile, TileCoord};
use starclash_platformer::config::PlatformerConfig;
use starclash_platformer::level::LevelError;
use starclash_platformer::{MatchEffect, MatchSim, StepInput, deliver};

use crate::config::SimConfig;

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    Join(PlayerId),
    Leave(PlayerId),
    HandOver(PlayerId),
    Stop,
}

#[derive(Debug)]
pub enum SessionError {
    Level(LevelError),
    Relay(RelayError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level(e) => write!(f, "level error: {e}"),
            Self::Relay(e) => write!(f, "relay error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<LevelError> for SessionError {
    fn from(e: LevelError) -> Self {
        Self::Level(e)
    }
}

impl From<RelayError> for SessionError {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub id: PlayerId,
    pub phase: MatchPhase,
    pub stars: u32,
    pub holdables: usize,
    pub grid_pristine: bool,
}

/// End-of-run report, printed as JSON by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub winner: Option<PlayerId>,
    pub authority: Option<PlayerId>,
    pub events_routed: usize,
    pub cached_events: usize,
    /// Every peer's grid matches the authority's.
    pub grids_agree: bool,
    pub peers: Vec<PeerSummary>,
}

/// A relay and one [`MatchSim`] per member, stepped together in id order.
pub struct Session {
    config: SimConfig,
    platformer: PlatformerConfig,
    relay: LocalRelay,
    sims: BTreeMap<PlayerId, MatchSim>,
    returned: BTreeSet<PlayerId>,
    rng: StdRng,
    tick: u64,
    events_routed: usize,
}

impl Session {
    pub fn new(config: SimConfig, platformer: PlatformerConfig) -> Result<Self, SessionError> {
        let mut session = Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            platformer,
            relay: LocalRelay::new(),
            sims: BTreeMap::new(),
            returned: BTreeSet::new(),
            tick: 0,
            events_routed: 0,
        };
        let ids: Vec<PlayerId> = (1..=session.config.peers as PlayerId).collect();
        let roster: Vec<Player> = ids.iter().map(|&id| peer(id)).collect();
        for &id in &ids {
            session.relay.join(id)?;
        }
        for &id in &ids {
            let sim = MatchSim::new(
                id,
                &roster,
                session.config.match_config.clone(),
                session.platformer.clone(),
            )?;
            session.sims.insert(id, sim);
            session.flush(id)?;
        }
        tracing::info!(peers = ids.len(), seed = session.config.seed, "Session created");
        Ok(session)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim(&self, id: PlayerId) -> Option<&MatchSim> {
        self.sims.get(&id)
    }

    pub fn members(&self) -> Vec<PlayerId> {
        self.sims.keys().copied().collect()
    }

    pub fn authority(&self) -> Option<PlayerId> {
        self.relay.authority()
    }

    /// Add a peer mid-match. It learns the match from the relay cache.
    pub fn join(&mut self, id: PlayerId) -> Result<(), SessionError> {
        let replayed = self.relay.join(id)?;
        let mut roster: Vec<Player> = self.sims.keys().map(|&p| peer(p)).collect();
        roster.push(peer(id));
        let sim = MatchSim::new(
            id,
            &roster,
            self.config.match_config.clone(),
            self.platformer.clone(),
        )?;
        self.sims.insert(id, sim);
        self.flush(id)?;
        tracing::info!(player_id = id, replayed, tick = self.tick, "Peer joined");
        Ok(())
    }

    pub fn leave(&mut self, id: PlayerId) -> bool {
        if !self.relay.leave(id) {
            return false;
        }
        self.sims.remove(&id);
        self.returned.remove(&id);
        for sim in self.sims.values_mut() {
            sim.remove_player(id);
        }
        tracing::info!(player_id = id, tick = self.tick, "Peer left");
        true
    }

    pub fn hand_over(&mut self, id: PlayerId) -> Result<(), SessionError> {
        self.relay.set_authority(id)?;
        tracing::info!(player_id = id, tick = self.tick, "Authority handed over");
        Ok(())
    }

    pub fn apply(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        match command {
            SessionCommand::Join(id) => self.join(id)?,
            SessionCommand::Leave(id) => {
                self.leave(id);
            },
            SessionCommand::HandOver(id) => self.hand_over(id)?,
            SessionCommand::Stop => {},
        }
        Ok(())
    }

    /// Every peer left the finished match, or the tick budget ran out.
    pub fn is_finished(&self) -> bool {
        self.tick >= self.config.max_ticks
            || (!self.sims.is_empty() && self.sims.keys().all(|id| self.returned.contains(id)))
    }

    /// One round: scripted events, then deliver, step and flush for every
    /// member in id order.
    pub fn step(&mut self) -> Result<(), SessionError> {
        self.run_script()?;

        let ids = self.members();
        for &id in &ids {
            let is_authority = self.relay.is_authority(id);
            if let Some(sim) = self.sims.get_mut(&id) {
                deliver(sim, &mut self.relay);
                sim.step(StepInput { is_authority });
            }
            self.flush(id)?;
        }

        self.play(&ids);
        for &id in &ids {
            self.flush(id)?;
        }
        self.collect_effects();
        self.tick += 1;
        Ok(())
    }

    fn run_script(&mut self) -> Result<(), SessionError> {
        if self.config.late_joiner_at_tick == Some(self.tick) {
            let id = self.sims.keys().next_back().copied().unwrap_or(0) + 1;
            self.join(id)?;
        }
        if self.config.authority_handover_tick == Some(self.tick) {
            let current = self.relay.authority();
            let next = self
                .sims
                .keys()
                .copied()
                .find(|&id| Some(id) > current)
                .or_else(|| self.sims.keys().next().copied());
            if let Some(next) = next {
                self.hand_over(next)?;
            }
        }
        if self.config.reset_tiles_at_tick == Some(self.tick)
            && let Some(authority) = self.relay.authority()
            && let Some(sim) = self.sims.get_mut(&authority)
            && sim.reset_tiles()
        {
            tracing::info!(tick = self.tick, "Tiles reset");
        }
        Ok(())
    }

    /// Stand-in for player input: random star pickups and block hits.
    fn play(&mut self, ids: &[PlayerId]) {
        if ids.is_empty() || self.config.quiet_after_tick.is_some_and(|t| self.tick >= t) {
            return;
        }
        if let Some(authority) = self.relay.authority()
            && self.rng.random_bool(self.config.star_collect_chance)
        {
            let player = ids[self.rng.random_range(0..ids.len())];
            if let Some(sim) = self.sims.get_mut(&authority)
                && sim.phase() == MatchPhase::InProgress
                && sim.collect_star(player)
            {
                tracing::debug!(player_id = player, tick = self.tick, "Star collected");
            }
        }

        for &id in ids {
            if !self.rng.random_bool(self.config.bump_chance) {
                continue;
            }
            let Some(sim) = self.sims.get_mut(&id) else {
                continue;
            };
            if sim.phase() != MatchPhase::InProgress {
                continue;
            }
            let targets = interactive_tiles(sim);
            if targets.is_empty() {
                continue;
            }
            let coord = targets[self.rng.random_range(0..targets.len())];
            sim.interact_tile(EntityRef::Player(id), coord, InteractionDirection::Up);
        }
    }

    fn flush(&mut self, id: PlayerId) -> Result<(), SessionError> {
        let Some(sim) = self.sims.get_mut(&id) else {
            return Ok(());
        };
        for outgoing in sim.take_outbox() {
            let (bytes, options) = encode_outgoing(&outgoing).map_err(RelayError::from)?;
            self.relay.route(id, bytes, options)?;
            self.events_routed += 1;
        }
        Ok(())
    }

    fn collect_effects(&mut self) {
        for (&id, sim) in self.sims.iter_mut() {
            for effect in sim.take_effects() {
                match effect {
                    MatchEffect::ReturnToMenu => {
                        self.returned.insert(id);
                    },
                    MatchEffect::GameOver { winner } => {
                        tracing::debug!(player_id = id, winner, "Peer saw game over");
                    },
                    other => tracing::trace!(player_id = id, effect = ?other, "Effect"),
                }
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let authority = self.relay.authority();
        let reference = authority.and_then(|id| self.sims.get(&id));
        let grids_agree = reference.is_none_or(|r| {
            self.sims
                .values()
                .all(|sim| sim.grid().cells() == r.grid().cells())
        });
        let winner = self.sims.values().find_map(|sim| sim.winner());
        let peers = self
            .sims
            .iter()
            .map(|(&id, sim)| PeerSummary {
                id,
                phase: sim.phase(),
                stars: sim.arena().player(id).map_or(0, |a| a.stars),
                holdables: sim.arena().holdables().count(),
                grid_pristine: sim.grid().is_pristine(),
            })
            .collect();
        SessionSummary {
            ticks: self.tick,
            winner,
            authority,
            events_routed: self.events_routed,
            cached_events: self.relay.cached_count(),
            grids_agree,
            peers,
        }
    }
}

fn peer(id: PlayerId) -> Player {
    Player::new(id, format!("Peer{id}"))
}

fn interactive_tiles(sim: &MatchSim) -> Vec<TileCoord> {
    let bounds = sim.grid().bounds();
    let mut out = Vec::new();
    for y in bounds.min_y..bounds.min_y + bounds.height as i32 {
        for x in bounds.min_x..bounds.min_x + bounds.width as i32 {
            let coord = TileCoord::new(x, y);
            if sim.grid().get(coord).is_some_and(Tile::is_interactive) {
                out.push(coord);
            }
        }
    }
    out
}

/// Drive `session` until it finishes or receives [`SessionCommand::Stop`].
/// Rounds are paced at the match tick rate when the config asks for it.
pub async fn run(
    mut session: Session,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
) -> Result<SessionSummary, SessionError> {
    let tick_rate = session.config.match_config.tick_rate_hz.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let realtime = session.config.realtime;
    let mut commands_open = true;

    while !session.is_finished() {
        if realtime {
            tokio::select! {
                _ = interval.tick() => session.step()?,
                cmd = cmd_rx.recv(), if commands_open => match cmd {
                    Some(SessionCommand::Stop) => break,
                    Some(cmd) => session.apply(cmd)?,
                    None => commands_open = false,
                },
            }
        } else {
            while let Ok(cmd) = cmd_rx.try_recv() {
                if matches!(cmd, SessionCommand::Stop) {
                    return Ok(session.summary());
                }
                session.apply(cmd)?;
            }
            session.step()?;
            tokio::task::yield_now().await;
        }
    }

    let summary = session.summary();
    tracing::info!(
        ticks = summary.ticks,
        winner = ?summary.winner,
        events = summary.events_routed,
        "Session finished"
    );
    Ok(summary)
}
