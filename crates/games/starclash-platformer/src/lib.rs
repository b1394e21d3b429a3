pub mod arena;
pub mod bump;
pub mod config;
pub mod holdable;
pub mod level;
pub mod physics;
pub mod scoring;
pub mod stars;
pub mod tiles;
pub mod win;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use starclash_core::clock::SimClock;
use starclash_core::net::messages::{
    CollectStarMsg, EventKind, Kinematics, MatchEvent, PickupRequestMsg, PlayerFinishedLoadingMsg,
    PropertySyncMsg, ResetTilesMsg, SetTileMsg, SpawnDestructiblePipeMsg, SpawnEnemiesMsg,
    TileInteractRequestMsg,
};
use starclash_core::net::protocol::{decode_event, encode_outgoing};
use starclash_core::net::relay::{
    Broadcast, Frame, LocalRelay, Outbox, Outgoing, Receivers, RelayError, SendOptions,
};
use starclash_core::player::{Player, PlayerId};
use starclash_core::replicated::{EntityId, EntityRef, Participant, ReplicatedObject};
use starclash_core::room::{MatchConfig, MatchPhase};
use starclash_core::schedule::{CancelToken, Scheduler};
use starclash_core::tile::{InteractionDirection, SpawnResult, Tile, TileCoord};

use arena::{Arena, ArenaEffect, PlayerAgent};
use bump::BumpTrigger;
use config::PlatformerConfig;
use holdable::HoldableKind;
use level::{Level, LevelError, TileGrid, generate_level};
use stars::StarSpawner;
use tiles::{Hitter, apply_tile_event, batch, resolve_interaction};
use win::WinArbiter;

/// Per-step input from the transport layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepInput {
    /// This participant is the authority for the step.
    pub is_authority: bool,
}

/// Work scheduled for a later tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    /// End of the start countdown. Tied to the match.
    ActivatePlayers,
    /// A bump animation finished; the authority restores the cell. Dropped
    /// if the grid was reset since the bump.
    RestoreBumpedTile {
        x: i32,
        y: i32,
        tile: Option<Tile>,
        epoch: u32,
    },
    /// Leave the finished match. Survives the match ending.
    ReturnToMenu,
}

/// Things the presentation layer reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEffect {
    Arena(ArenaEffect),
    PlayersActivated,
    TileBumped {
        x: i32,
        y: i32,
        from_above: bool,
        result_tile: Option<Tile>,
        spawn: SpawnResult,
    },
    TilesReset,
    Particle { x: i32, y: i32, name: String },
    DestructiblePipe(SpawnDestructiblePipeMsg),
    StarSpawned { index: u32, x: f32, y: f32 },
    StarCollected { player: PlayerId },
    GameOver { winner: PlayerId },
    ReturnToMenu,
}

/// One participant's view of a match.
///
/// Each call to [`MatchSim::step`] applies the frames received since the last
/// step, runs deferred tasks, arbitration and entity physics, queues the
/// resulting events in the outbox and advances the clock by one tick.
pub struct MatchSim {
    local_id: PlayerId,
    is_authority: bool,
    match_config: MatchConfig,
    config: PlatformerConfig,
    clock: SimClock,
    phase: MatchPhase,
    level: Level,
    /// Bumped on every grid reset.
    grid_epoch: u32,
    /// Cells the authority sent a mutation for that has not come back yet.
    tiles_in_flight: BTreeSet<TileCoord>,
    arena: Arena,
    roster: BTreeMap<PlayerId, Player>,
    loaded: BTreeSet<PlayerId>,
    scheduler: Scheduler<DeferredTask>,
    arbiter: WinArbiter,
    stars: StarSpawner,
    bump: BumpTrigger,
    inbox: VecDeque<Frame>,
    outbox: Outbox<MatchEvent>,
    effects: Vec<MatchEffect>,
}

impl MatchSim {
    /// Build the level and announce that this participant finished loading.
    pub fn new(
        local_id: PlayerId,
        roster: &[Player],
        match_config: MatchConfig,
        config: PlatformerConfig,
    ) -> Result<Self, LevelError> {
        let level = generate_level(config.level_seed)?;
        let arena = Arena::new(
            Participant::peer(local_id),
            config.holdable.clone(),
            config.physics.clone(),
        );
        let stars = StarSpawner::new(level.star_spawns.clone(), config.stars.clone());
        let mut sim = Self {
            local_id,
            is_authority: false,
            clock: SimClock::new(match_config.tick_rate_hz),
            arbiter: WinArbiter::new(match_config.star_requirement),
            match_config,
            config,
            phase: MatchPhase::Loading,
            level,
            grid_epoch: 0,
            tiles_in_flight: BTreeSet::new(),
            arena,
            roster: BTreeMap::new(),
            loaded: BTreeSet::new(),
            scheduler: Scheduler::new(),
            stars,
            bump: BumpTrigger::default(),
            inbox: VecDeque::new(),
            outbox: Outbox::new(),
            effects: Vec::new(),
        };
        for player in roster.iter().filter(|p| !p.is_spectator) {
            sim.add_player(player.clone());
        }

        sim.loaded.insert(local_id);
        sim.outbox.send(
            MatchEvent::PlayerFinishedLoading(PlayerFinishedLoadingMsg { player: local_id }),
            SendOptions::cached(Receivers::Others),
        );
        tracing::debug!(player_id = local_id, players = sim.roster.len(), "Match loaded");
        Ok(sim)
    }

    pub fn local_id(&self) -> PlayerId {
        self.local_id
    }

    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn grid(&self) -> &TileGrid {
        &self.level.grid
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.arbiter.winner()
    }

    pub fn current_star(&self) -> Option<u32> {
        self.stars.current()
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.pending()
    }

    /// Queue a frame for the next step.
    pub fn receive(&mut self, frame: Frame) {
        self.inbox.push_back(frame);
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing<MatchEvent>> {
        self.outbox.take()
    }

    pub fn take_effects(&mut self) -> Vec<MatchEffect> {
        std::mem::take(&mut self.effects)
    }

    // ========================================================================
    // Roster
    // ========================================================================

    pub fn add_player(&mut self, player: Player) {
        if player.is_spectator || self.roster.contains_key(&player.id) {
            return;
        }
        let id = player.id;
        self.roster.insert(id, player);
        let index = self.arena.player_count();
        let (x, y) = self.level.spawn_position(index, self.roster.len());
        self.arena.add_player(PlayerAgent::new(id, x, y));
    }

    pub fn remove_player(&mut self, id: PlayerId) {
        self.roster.remove(&id);
        self.loaded.remove(&id);
        self.arena.remove_player(id);
    }

    /// Star counts are owned by gameplay collaborators.
    pub fn set_stars(&mut self, id: PlayerId, stars: u32) {
        if let Some(agent) = self.arena.player_mut(id) {
            agent.stars = stars;
        }
    }

    pub fn set_player_body(&mut self, id: PlayerId, body: Kinematics) {
        if let Some(agent) = self.arena.player_mut(id) {
            agent.body = body;
        }
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerAgent> {
        self.arena.player_mut(id)
    }

    /// Place a holdable outside the level's enemy spawns. Every participant
    /// must spawn it with the same id.
    pub fn spawn_holdable(&mut self, id: EntityId, kind: HoldableKind, x: f32, y: f32) {
        self.arena.spawn_holdable(id, kind, x, y);
    }

    // ========================================================================
    // Local actions
    // ========================================================================

    /// Pick up `entity` with the local agent. When the entity belongs to the
    /// authority and this participant is not it, the request is forwarded
    /// and `false` is returned.
    pub fn request_pickup(&mut self, entity: EntityId) -> bool {
        let Some(obj) = self.arena.holdable(entity) else {
            return false;
        };
        if self.arena.local().may_write(obj.writer()) {
            return self.arena.pickup(entity, self.local_id);
        }
        if obj.holder().is_none() && !obj.is_dead() {
            self.outbox.send(
                MatchEvent::PickupRequest(PickupRequestMsg {
                    entity,
                    agent: self.local_id,
                }),
                SendOptions::to(Receivers::Authority),
            );
        }
        false
    }

    /// Throw whatever the local agent holds.
    pub fn throw_held(&mut self, to_right: bool, crouching: bool) -> bool {
        let Some(entity) = self.arena.player(self.local_id).and_then(|a| a.holding()) else {
            return false;
        };
        self.arena
            .throw(&self.clock, &self.level.grid, entity, to_right, crouching)
    }

    pub fn kick(
        &mut self,
        entity: EntityId,
        from_left: bool,
        kick_factor: f32,
        groundpound: bool,
    ) -> bool {
        self.arena
            .kick(entity, self.local_id, from_left, kick_factor, groundpound)
    }

    pub fn kill(&mut self, entity: EntityId) -> bool {
        self.arena.kill(entity)
    }

    /// An agent or entity struck an interactive tile. Everyone runs the bump
    /// trigger; only the authority turns the hit into grid commands.
    pub fn interact_tile(
        &mut self,
        interacter: EntityRef,
        coord: TileCoord,
        direction: InteractionDirection,
    ) {
        let tile = self.level.grid.get(coord);
        if !tile.is_some_and(Tile::is_interactive) {
            return;
        }
        if self.is_authority && self.tiles_in_flight.contains(&coord) {
            tracing::trace!(x = coord.x, y = coord.y, "Tile already reacting, hit ignored");
            return;
        }
        let hitter = match interacter {
            EntityRef::Player(id) => match self.arena.player(id) {
                Some(agent) => Hitter::Player { big: agent.big },
                None => return,
            },
            EntityRef::Holdable(id) => match self.arena.holdable(id) {
                Some(obj) => Hitter::Holdable(obj.kind),
                None => return,
            },
        };

        self.bump
            .trigger(&mut self.arena, interacter, coord, direction);

        if !self.is_authority {
            self.outbox.send(
                MatchEvent::TileInteractRequest(TileInteractRequestMsg {
                    x: coord.x,
                    y: coord.y,
                    direction,
                    interacter,
                }),
                SendOptions::to(Receivers::Authority),
            );
            return;
        }
        for event in resolve_interaction(tile, coord, hitter, direction, &self.config.tiles) {
            let options = if event.kind().is_tile_mutation() {
                self.tiles_in_flight.insert(coord);
                SendOptions::cached(Receivers::All)
            } else {
                SendOptions::to(Receivers::All)
            };
            self.outbox.send(event, options);
        }
    }

    /// Restore the original grid everywhere, including for later joiners.
    pub fn reset_tiles(&mut self) -> bool {
        if !self.is_authority {
            return false;
        }
        // Restores already queued belong to the old grid.
        self.grid_epoch = self.grid_epoch.wrapping_add(1);
        for kind in [EventKind::SetTile, EventKind::SetTileBatch, EventKind::BumpTile] {
            self.outbox.uncache(kind);
        }
        self.outbox.send(
            MatchEvent::ResetTiles(ResetTilesMsg {}),
            SendOptions::to(Receivers::All),
        );
        true
    }

    pub fn set_tile(&mut self, coord: TileCoord, tile: Option<Tile>) -> bool {
        if !self.is_authority {
            return false;
        }
        self.outbox.send(
            MatchEvent::SetTile(SetTileMsg {
                x: coord.x,
                y: coord.y,
                tile,
            }),
            SendOptions::cached(Receivers::All),
        );
        true
    }

    pub fn set_tiles(
        &mut self,
        origin: TileCoord,
        width: u32,
        height: u32,
        tiles: Vec<Option<Tile>>,
    ) -> bool {
        if !self.is_authority {
            return false;
        }
        self.outbox
            .send(batch(origin, width, height, tiles), SendOptions::cached(Receivers::All));
        true
    }

    pub fn spawn_destructible_pipe(&mut self, msg: SpawnDestructiblePipeMsg) -> bool {
        if !self.is_authority {
            return false;
        }
        self.outbox.send(
            MatchEvent::SpawnDestructiblePipe(msg),
            SendOptions::to(Receivers::All),
        );
        true
    }

    /// Report that `player` touched the current star.
    pub fn collect_star(&mut self, player: PlayerId) -> bool {
        if !self.is_authority || self.stars.current().is_none() {
            return false;
        }
        self.outbox.uncache(EventKind::SpawnStar);
        self.outbox.send(
            MatchEvent::CollectStar(CollectStarMsg { player }),
            SendOptions::to(Receivers::All),
        );
        true
    }

    // ========================================================================
    // Step
    // ========================================================================

    pub fn step(&mut self, input: StepInput) {
        if input.is_authority != self.is_authority {
            tracing::info!(
                player_id = self.local_id,
                is_authority = input.is_authority,
                "Authority changed"
            );
        }
        self.is_authority = input.is_authority;
        if !self.is_authority {
            self.tiles_in_flight.clear();
        }
        self.arena.set_local(Participant {
            id: self.local_id,
            is_authority: input.is_authority,
        });

        // Inbound first, so local logic sees a consistent state
        while let Some(frame) = self.inbox.pop_front() {
            self.apply_frame(frame);
        }

        self.check_loading();

        for task in self.scheduler.pop_due(self.clock.now()) {
            self.run_task(task);
        }

        // Win arbitration
        if self.phase == MatchPhase::InProgress
            && let Some(msg) = self
                .arbiter
                .check(self.is_authority, self.arena.players().map(|a| (a.id, a.stars)))
        {
            self.outbox
                .send(MatchEvent::EndGame(msg), SendOptions::to(Receivers::All));
        }

        // Entities
        let hits = self.arena.tick(&self.clock, &self.level.grid);
        for hit in hits {
            self.interact_tile(hit.by, hit.coord, hit.direction);
        }

        // Stars
        if self.is_authority && self.phase == MatchPhase::InProgress {
            let positions: Vec<(f32, f32)> = self
                .arena
                .players()
                .map(|a| (a.body.x, a.body.y))
                .collect();
            if let Some(msg) = self.stars.tick(&self.clock, &positions) {
                self.outbox
                    .send(MatchEvent::SpawnStar(msg), SendOptions::cached(Receivers::All));
            }
        }

        let updates = self.arena.collect_updates();
        if !updates.is_empty() {
            self.outbox.send(
                MatchEvent::PropertySync(PropertySyncMsg {
                    tick: self.clock.now(),
                    updates,
                }),
                SendOptions::to(Receivers::Others),
            );
        }

        self.effects
            .extend(self.arena.take_effects().into_iter().map(MatchEffect::Arena));
        self.clock.advance();
    }

    fn check_loading(&mut self) {
        if self.phase != MatchPhase::Loading {
            return;
        }
        if !self.roster.keys().all(|id| self.loaded.contains(id)) {
            return;
        }
        self.phase = MatchPhase::Starting;
        if self.is_authority {
            self.outbox.uncache(EventKind::PlayerFinishedLoading);
        }
        let at = self.clock.secs_from_now(self.match_config.activation_delay_secs);
        let token = self.scheduler.match_token();
        self.scheduler.schedule(at, token, DeferredTask::ActivatePlayers);
        tracing::info!(players = self.roster.len(), activate_at = at, "All players loaded");
    }

    fn run_task(&mut self, task: DeferredTask) {
        match task {
            DeferredTask::ActivatePlayers => {
                if self.activate() && self.is_authority {
                    self.outbox.send(
                        MatchEvent::SpawnEnemies(SpawnEnemiesMsg {}),
                        SendOptions::cached(Receivers::All),
                    );
                }
            },
            DeferredTask::RestoreBumpedTile { x, y, tile, epoch } => {
                if self.is_authority && epoch == self.grid_epoch {
                    self.outbox.send(
                        MatchEvent::SetTile(SetTileMsg { x, y, tile }),
                        SendOptions::cached(Receivers::All),
                    );
                }
            },
            DeferredTask::ReturnToMenu => self.effects.push(MatchEffect::ReturnToMenu),
        }
    }

    /// Enter play. Returns false if the match already started or ended.
    fn activate(&mut self) -> bool {
        if !matches!(self.phase, MatchPhase::Loading | MatchPhase::Starting) {
            return false;
        }
        self.phase = MatchPhase::InProgress;
        self.effects.push(MatchEffect::PlayersActivated);
        true
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn apply_frame(&mut self, frame: Frame) {
        let event = match decode_event(&frame.bytes) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(sender = frame.sender, error = %e, "Dropped undecodable frame");
                return;
            },
        };
        let origin = Participant {
            id: frame.sender,
            is_authority: frame.from_authority,
        };
        let kind = event.kind();
        let authority_only = !matches!(
            kind,
            EventKind::PropertySync
                | EventKind::PickupRequest
                | EventKind::TileInteractRequest
                | EventKind::PlayerFinishedLoading
        );
        if authority_only && !frame.from_authority {
            tracing::debug!(sender = frame.sender, ?kind, "Ignored authority event from a peer");
            return;
        }

        match event {
            MatchEvent::PropertySync(msg) => {
                if frame.from_authority && msg.tick > self.clock.now() {
                    tracing::debug!(
                        from = self.clock.now(),
                        to = msg.tick,
                        "Caught up with authority clock"
                    );
                    self.clock = SimClock::starting_at(msg.tick, self.clock.tick_rate_hz());
                }
                self.arena.apply_updates(&origin, msg.updates);
            },
            MatchEvent::PickupRequest(msg) => {
                if self.is_authority && msg.agent == frame.sender {
                    self.arena.pickup(msg.entity, msg.agent);
                }
            },
            MatchEvent::TileInteractRequest(msg) => {
                if self.is_authority {
                    self.interact_tile(msg.interacter, TileCoord::new(msg.x, msg.y), msg.direction);
                }
            },
            event @ (MatchEvent::SetTile(_)
            | MatchEvent::SetTileBatch(_)
            | MatchEvent::BumpTile(_)
            | MatchEvent::ResetTiles(_)) => {
                apply_tile_event(&mut self.level.grid, &event);
                match &event {
                    MatchEvent::SetTile(msg) => {
                        self.tiles_in_flight.remove(&TileCoord::new(msg.x, msg.y));
                    },
                    MatchEvent::SetTileBatch(msg) => {
                        let (x0, y0) = (i64::from(msg.x), i64::from(msg.y));
                        let (w, h) = (i64::from(msg.width), i64::from(msg.height));
                        self.tiles_in_flight.retain(|c| {
                            let (x, y) = (i64::from(c.x), i64::from(c.y));
                            !(x >= x0 && x < x0 + w && y >= y0 && y < y0 + h)
                        });
                    },
                    _ => {},
                }
                match event {
                    MatchEvent::BumpTile(msg) => {
                        self.tiles_in_flight.remove(&TileCoord::new(msg.x, msg.y));
                        let at = self.clock.secs_from_now(self.config.tiles.bump_restore_secs);
                        let token = self.scheduler.match_token();
                        self.scheduler.schedule(
                            at,
                            token,
                            DeferredTask::RestoreBumpedTile {
                                x: msg.x,
                                y: msg.y,
                                tile: msg.result_tile,
                                epoch: self.grid_epoch,
                            },
                        );
                        self.effects.push(MatchEffect::TileBumped {
                            x: msg.x,
                            y: msg.y,
                            from_above: msg.from_above,
                            result_tile: msg.result_tile,
                            spawn: msg.spawn,
                        });
                    },
                    MatchEvent::ResetTiles(_) => {
                        self.grid_epoch = self.grid_epoch.wrapping_add(1);
                        self.tiles_in_flight.clear();
                        self.effects.push(MatchEffect::TilesReset);
                    },
                    _ => {},
                }
            },
            MatchEvent::SpawnParticle(msg) => {
                self.effects.push(MatchEffect::Particle {
                    x: msg.x,
                    y: msg.y,
                    name: msg.name,
                });
            },
            MatchEvent::SpawnDestructiblePipe(msg) => {
                self.effects.push(MatchEffect::DestructiblePipe(msg));
            },
            MatchEvent::PlayerFinishedLoading(msg) => {
                if msg.player != frame.sender {
                    return;
                }
                if !self.roster.contains_key(&msg.player) {
                    self.add_player(Player::new(msg.player, format!("Player{}", msg.player)));
                }
                self.loaded.insert(msg.player);
                if self.phase != MatchPhase::Loading {
                    self.arena.resync_late_joiner();
                    tracing::debug!(player_id = msg.player, "Late joiner, resyncing entities");
                }
            },
            MatchEvent::SpawnEnemies(_) => {
                let spawned = self.arena.spawn_enemies(&self.level.enemy_spawns);
                tracing::debug!(spawned, "Enemies spawned");
                self.activate();
            },
            MatchEvent::EndGame(msg) => {
                if self.arbiter.on_end_game(&msg) {
                    self.phase = MatchPhase::GameOver;
                    self.scheduler.invalidate();
                    let at = self.clock.secs_from_now(self.match_config.end_game_delay_secs);
                    self.scheduler
                        .schedule(at, CancelToken::Detached, DeferredTask::ReturnToMenu);
                    self.effects.push(MatchEffect::GameOver { winner: msg.winner });
                    tracing::info!(winner = msg.winner, "Match over");
                }
            },
            MatchEvent::SpawnStar(msg) => {
                self.stars.on_spawn(&msg);
                self.effects.push(MatchEffect::StarSpawned {
                    index: msg.spawn_index,
                    x: msg.x,
                    y: msg.y,
                });
            },
            MatchEvent::CollectStar(msg) => {
                self.stars.on_collect();
                if let Some(agent) = self.arena.player_mut(msg.player) {
                    agent.stars = agent.stars.saturating_add(1);
                }
                self.effects
                    .push(MatchEffect::StarCollected { player: msg.player });
            },
        }
    }
}

// ============================================================================
// Driving a match over a relay
// ============================================================================

/// Encode everything `sim` queued and route it through `relay`. Returns the
/// number of entries sent.
pub fn flush_outbox(sim: &mut MatchSim, relay: &mut LocalRelay) -> Result<usize, RelayError> {
    let pending = sim.take_outbox();
    for outgoing in &pending {
        let (bytes, options) = encode_outgoing(outgoing)?;
        relay.route(sim.local_id(), bytes, options)?;
    }
    Ok(pending.len())
}

/// Hand every frame queued for `sim` in `relay` to it.
pub fn deliver(sim: &mut MatchSim, relay: &mut LocalRelay) -> usize {
    let frames = relay.drain(sim.local_id());
    let count = frames.len();
    for frame in frames {
        sim.receive(frame);
    }
    count
}
