//! Player agents and holdable entities sharing one level.
//!
//! The arena owns both sides of the holding relation. Every change to who
//! holds what goes through [`Arena::set_holding`], so an agent's `holding`
//! and an entity's `holder` never disagree.

use std::collections::BTreeMap;

use starclash_core::clock::{SimClock, TickTimer};
use starclash_core::net::messages::{HoldableField, Kinematics};
use starclash_core::player::PlayerId;
use starclash_core::replicated::{
    EntityId, EntityRef, Participant, PropertyStore, PropertyUpdate, ReplicatedObject, Writer,
};
use starclash_core::tile::{InteractionDirection, TileCoord};

use crate::bump::{BumpTarget, SpatialQuery};
use crate::holdable::{HoldableConfig, HoldableEntity, HoldableKind};
use crate::level::{EnemySpawn, TILE_SIZE, TileGrid, tile_to_world};
use crate::physics::{Aabb, PhysicsConfig, step_body};
use crate::scoring::combo_score;

/// Player collider half width.
pub const PLAYER_HALF_WIDTH: f32 = 0.2;
/// Player collider half height when small.
pub const PLAYER_HALF_HEIGHT_SMALL: f32 = 0.2;
/// Player collider half height when big.
pub const PLAYER_HALF_HEIGHT_BIG: f32 = 0.4;
/// Horizontal deceleration of a grounded bob-omb (units/s^2).
const BOBOMB_GROUND_FRICTION: f32 = 6.0;

/// A player's avatar as the arena sees it. Movement and input belong to
/// external collaborators; the arena reads the body and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAgent {
    pub id: PlayerId,
    pub body: Kinematics,
    pub big: bool,
    pub facing_right: bool,
    pub crouching: bool,
    /// The grab button is held.
    pub wants_grab: bool,
    pub groundpounding: bool,
    pub stars: u32,
    holding: Option<EntityId>,
}

impl PlayerAgent {
    pub fn new(id: PlayerId, x: f32, y: f32) -> Self {
        Self {
            id,
            body: Kinematics {
                x,
                y,
                ..Default::default()
            },
            big: false,
            facing_right: true,
            crouching: false,
            wants_grab: false,
            groundpounding: false,
            stars: 0,
            holding: None,
        }
    }

    pub fn holding(&self) -> Option<EntityId> {
        self.holding
    }

    pub fn collider(&self) -> Aabb {
        let half_h = if self.big {
            PLAYER_HALF_HEIGHT_BIG
        } else {
            PLAYER_HALF_HEIGHT_SMALL
        };
        Aabb::around(&self.body, PLAYER_HALF_WIDTH, half_h)
    }
}

/// Outcome of a player touching a holdable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// No collision: the player is the holder, is shielded, or cannot be
    /// handled here.
    Ignored,
    Stomped,
    DamagedPlayer,
    PickedUp,
    Kicked,
}

/// Observable results of arena transitions, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ArenaEffect {
    PickedUp { entity: EntityId, agent: PlayerId },
    Released { entity: EntityId, agent: PlayerId },
    Thrown { entity: EntityId, agent: PlayerId },
    Kicked { entity: EntityId, by: PlayerId },
    Stomped { entity: EntityId, by: PlayerId },
    PlayerDamaged { player: PlayerId, by: EntityId },
    Killed { entity: EntityId, points: u32 },
    Exploded { entity: EntityId, x: f32, y: f32 },
    HoldableBumped { entity: EntityId },
    PlayerBumped { player: PlayerId, by: EntityRef },
}

/// An entity ran into a tile while moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileHit {
    pub coord: TileCoord,
    pub direction: InteractionDirection,
    pub by: EntityRef,
}

#[derive(Debug)]
pub struct Arena {
    players: BTreeMap<PlayerId, PlayerAgent>,
    holdables: PropertyStore<HoldableEntity>,
    local: Participant,
    config: HoldableConfig,
    physics: PhysicsConfig,
    effects: Vec<ArenaEffect>,
    /// Send the owners of foreign-written entities with the next sync.
    announce_owners: bool,
}

impl Arena {
    pub fn new(local: Participant, config: HoldableConfig, physics: PhysicsConfig) -> Self {
        Self {
            players: BTreeMap::new(),
            holdables: PropertyStore::new(),
            local,
            config,
            physics,
            effects: Vec::new(),
            announce_owners: false,
        }
    }

    pub fn local(&self) -> Participant {
        self.local
    }

    /// Update the authority flag for this step.
    pub fn set_local(&mut self, local: Participant) {
        self.local = local;
    }

    pub fn config(&self) -> &HoldableConfig {
        &self.config
    }

    // ========================================================================
    // Players
    // ========================================================================

    pub fn add_player(&mut self, agent: PlayerAgent) {
        let mut agent = agent;
        agent.holding = None;
        self.players.insert(agent.id, agent);
        self.rebuild_holding();
    }

    /// Remove a player. Entities it held are dropped and entities it wrote
    /// return to the authority; every participant does this locally.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerAgent> {
        let authority = self.local.is_authority;
        let mut held = Vec::new();
        for (entity, obj) in self.holdables.iter_mut() {
            if obj.writer() == Writer::Peer(id) || obj.effective_writer() == Writer::Peer(id) {
                obj.reclaim(Writer::Authority);
                if authority {
                    obj.mark_all_dirty();
                }
                tracing::debug!(entity, player = id, "Reclaimed entity from departing player");
            }
            if obj.holder() == Some(id) {
                held.push(entity);
            }
        }
        for entity in held {
            self.set_holding(entity, None);
        }
        self.players.remove(&id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerAgent> {
        self.players.get(&id)
    }

    /// Mutable access to an agent's body and flags. The holding relation is
    /// not reachable from here.
    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerAgent> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerAgent> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    // ========================================================================
    // Holdables
    // ========================================================================

    pub fn holdable(&self, id: EntityId) -> Option<&HoldableEntity> {
        self.holdables.get(id)
    }

    pub fn holdables(&self) -> impl Iterator<Item = (EntityId, &HoldableEntity)> {
        self.holdables.iter()
    }

    pub fn spawn_holdable(&mut self, id: EntityId, kind: HoldableKind, x: f32, y: f32) {
        self.holdables.insert(id, HoldableEntity::spawn(kind, x, y));
    }

    /// Spawn a level's enemies with ids `1..=n`, replacing dead ones and
    /// leaving live ones alone.
    pub fn spawn_enemies(&mut self, spawns: &[EnemySpawn]) -> usize {
        let mut spawned = 0;
        for (index, spawn) in spawns.iter().enumerate() {
            let id = index as EntityId + 1;
            let alive = self.holdables.get(id).is_some_and(|obj| !obj.is_dead());
            if alive {
                continue;
            }
            self.spawn_holdable(id, spawn.kind, spawn.x, spawn.y);
            spawned += 1;
        }
        spawned
    }

    pub fn take_effects(&mut self) -> Vec<ArenaEffect> {
        std::mem::take(&mut self.effects)
    }

    /// The one place the holding relation changes. Clears the old holder's
    /// back-reference before setting the new one.
    fn set_holding(&mut self, entity: EntityId, holder: Option<PlayerId>) {
        let Some(obj) = self.holdables.get_mut(entity) else {
            return;
        };
        let old = obj.holder();
        if old == holder {
            return;
        }
        if let Some(old) = old
            && let Some(agent) = self.players.get_mut(&old)
            && agent.holding == Some(entity)
        {
            agent.holding = None;
        }
        if let Some(new) = holder
            && let Some(agent) = self.players.get_mut(&new)
        {
            agent.holding = Some(entity);
        }
        obj.set_holder(holder);
    }

    /// Derive every agent's `holding` from the entities' `holder` fields.
    /// Used after remote updates, which change only the entity side.
    fn rebuild_holding(&mut self) {
        for agent in self.players.values_mut() {
            agent.holding = None;
        }
        for (entity, obj) in self.holdables.iter() {
            if obj.is_dead() {
                continue;
            }
            if let Some(holder) = obj.holder()
                && let Some(agent) = self.players.get_mut(&holder)
                && agent.holding.is_none()
            {
                agent.holding = Some(entity);
            }
        }
    }

    /// Held entities follow their holder with zero velocity.
    fn snap_held(&mut self) {
        for (_, obj) in self.holdables.iter_mut() {
            if obj.is_dead() {
                continue;
            }
            let Some(holder) = obj.holder() else {
                continue;
            };
            if let Some(agent) = self.players.get(&holder) {
                obj.snap_to(&agent.body, agent.facing_right, self.config.holder_offset);
            }
        }
    }

    fn writable(&self, obj: &HoldableEntity) -> bool {
        self.local.may_write(obj.writer())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Pick up a free entity. Not gated by the throw window.
    pub fn pickup(&mut self, entity: EntityId, agent: PlayerId) -> bool {
        let Some(obj) = self.holdables.get(entity) else {
            return false;
        };
        if obj.is_dead() || obj.holder().is_some() || !self.writable(obj) {
            tracing::trace!(entity, agent, "Pickup ignored");
            return false;
        }
        if !self
            .players
            .get(&agent)
            .is_some_and(|a| a.holding.is_none())
        {
            return false;
        }

        self.set_holding(entity, Some(agent));
        if let Some(obj) = self.holdables.get_mut(entity) {
            obj.set_previous_holder(None);
            obj.set_throw_invincibility(TickTimer::NONE);
            obj.hand_over(Writer::Peer(agent));
        }
        self.snap_held();
        self.effects.push(ArenaEffect::PickedUp { entity, agent });
        true
    }

    /// Release a held entity with throw velocity.
    pub fn throw(
        &mut self,
        clock: &SimClock,
        grid: &TileGrid,
        entity: EntityId,
        to_right: bool,
        crouching: bool,
    ) -> bool {
        let Some(obj) = self.holdables.get(entity) else {
            return false;
        };
        let Some(holder) = obj.holder() else {
            tracing::trace!(entity, "Throw ignored, not held");
            return false;
        };
        if obj.is_dead() || !self.writable(obj) {
            return false;
        }
        let holder_x = self.players.get(&holder).map(|a| a.body.x);

        let Some(obj) = self.holdables.get_mut(entity) else {
            return false;
        };
        let mut body = obj.body();
        if let Some(holder_x) = holder_x
            && grid.is_solid_at_world(body.x, body.y)
        {
            body.x = holder_x;
        }
        let window = TickTimer::from_secs(clock, self.config.throw_invincibility_secs);
        obj.set_throw_invincibility(window);
        obj.set_previous_holder(Some(holder));
        self.set_holding(entity, None);

        let Some(obj) = self.holdables.get_mut(entity) else {
            return false;
        };
        obj.set_facing_right(to_right);
        let speed = if crouching && obj.can_place {
            self.config.place_speed
        } else {
            self.config.throw_speed
        };
        body.vx = if to_right { speed } else { -speed };
        obj.set_body(body);
        obj.hand_over(Writer::Authority);
        self.effects.push(ArenaEffect::Thrown {
            entity,
            agent: holder,
        });
        true
    }

    /// Kick a free entity away from the kicker.
    pub fn kick(
        &mut self,
        entity: EntityId,
        by: PlayerId,
        from_left: bool,
        kick_factor: f32,
        groundpound: bool,
    ) -> bool {
        let Some(obj) = self.holdables.get(entity) else {
            return false;
        };
        if obj.is_dead() || obj.holder().is_some() || !obj.can_kick || !self.writable(obj) {
            return false;
        }
        let config = &self.config;
        let Some(obj) = self.holdables.get_mut(entity) else {
            return false;
        };
        let mut body = obj.body();
        let sign = if from_left { 1.0 } else { -1.0 };
        match obj.kind {
            HoldableKind::Shell => {
                body.vx = sign * config.shell_kick_speed * (0.9 + kick_factor * 0.1);
                if groundpound {
                    body.vy = config.shell_groundpound_lift;
                }
            },
            HoldableKind::Bobomb => {
                body.vx = sign * config.bobomb_kick_speed * kick_factor;
                body.vy = if groundpound {
                    config.groundpound_kick_lift
                } else {
                    config.bobomb_kick_lift
                };
            },
        }
        obj.set_facing_right(from_left);
        obj.set_body(body);
        self.effects.push(ArenaEffect::Kicked { entity, by });
        true
    }

    /// Resolve a player touching an entity.
    pub fn interact_with_player(
        &mut self,
        clock: &SimClock,
        entity: EntityId,
        agent: PlayerId,
    ) -> Interaction {
        let Some(obj) = self.holdables.get(entity) else {
            return Interaction::Ignored;
        };
        let Some(player) = self.players.get(&agent) else {
            return Interaction::Ignored;
        };
        if obj.is_dead() || obj.holder() == Some(agent) {
            return Interaction::Ignored;
        }
        if obj.shields_previous_holder(agent, clock) {
            tracing::trace!(entity, agent, "Thrower shielded from own throw");
            return Interaction::Ignored;
        }
        if obj.holder().is_some() || !self.writable(obj) {
            return Interaction::Ignored;
        }

        let body = obj.body();
        let kind = obj.kind;
        let moving_toward = obj.is_moving(self.config.moving_threshold)
            && (body.vx > 0.0) == (player.body.x > body.x);
        let stomping = player.body.vy < 0.0 && player.body.y > body.y;
        let grabs = player.wants_grab && player.holding.is_none();
        let from_left = player.body.x < body.x;
        let groundpound = player.groundpounding;

        if stomping {
            match kind {
                HoldableKind::Shell => {
                    if let Some(obj) = self.holdables.get_mut(entity) {
                        obj.set_body(Kinematics { vx: 0.0, ..body });
                    }
                },
                HoldableKind::Bobomb => {
                    self.special_kill(entity, !from_left, groundpound, 0);
                },
            }
            self.effects.push(ArenaEffect::Stomped { entity, by: agent });
            return Interaction::Stomped;
        }
        if kind == HoldableKind::Shell && moving_toward {
            self.effects.push(ArenaEffect::PlayerDamaged {
                player: agent,
                by: entity,
            });
            return Interaction::DamagedPlayer;
        }
        if grabs && self.pickup(entity, agent) {
            return Interaction::PickedUp;
        }
        if self.kick(entity, agent, from_left, 1.0, groundpound) {
            return Interaction::Kicked;
        }
        Interaction::Ignored
    }

    /// Kill without a combo: the entity is simply removed from play.
    pub fn kill(&mut self, entity: EntityId) -> bool {
        self.kill_with(entity, None)
    }

    /// Kill as part of a combo, launching the corpse.
    pub fn special_kill(
        &mut self,
        entity: EntityId,
        right: bool,
        groundpound: bool,
        combo: u32,
    ) -> bool {
        self.kill_with(entity, Some((right, groundpound, combo)))
    }

    fn kill_with(&mut self, entity: EntityId, special: Option<(bool, bool, u32)>) -> bool {
        let Some(obj) = self.holdables.get(entity) else {
            return false;
        };
        if obj.is_dead() || !self.writable(obj) {
            return false;
        }
        if let Some(holder) = obj.holder() {
            self.set_holding(entity, None);
            self.effects.push(ArenaEffect::Released {
                entity,
                agent: holder,
            });
        }

        let launch = self.config.corpse_launch_speed;
        let Some(obj) = self.holdables.get_mut(entity) else {
            return false;
        };
        obj.set_dead();
        let mut body = obj.body();
        let points = match special {
            Some((right, groundpound, combo)) => {
                body.vx = if right { launch } else { -launch };
                body.vy = if groundpound { launch * 2.0 } else { launch };
                obj.set_body(body);
                combo_score(combo)
            },
            None => 0,
        };
        obj.hand_over(Writer::Authority);
        let kind = obj.kind;
        self.effects.push(ArenaEffect::Killed { entity, points });
        if kind == HoldableKind::Bobomb {
            self.effects.push(ArenaEffect::Exploded {
                entity,
                x: body.x,
                y: body.y,
            });
        }
        tracing::debug!(entity, points, "Entity killed");
        true
    }

    // ========================================================================
    // Step
    // ========================================================================

    /// Advance owned entities one tick. Returns interactive tiles that moving
    /// entities ran into.
    pub fn tick(&mut self, clock: &SimClock, grid: &TileGrid) -> Vec<TileHit> {
        let dt = clock.delta_secs();
        let mut hits = Vec::new();
        let mut fell_out = Vec::new();
        let local = self.local;

        for (entity, obj) in self.holdables.iter_mut() {
            if obj.is_dead() || obj.holder().is_some() || !local.may_write(obj.writer()) {
                continue;
            }
            if obj.previous_holder().is_some()
                && obj.throw_invincibility().expired_or_not_running(clock)
            {
                obj.set_previous_holder(None);
                obj.set_throw_invincibility(TickTimer::NONE);
            }

            let (half_w, half_h) = obj.kind.half_extents();
            let mut body = obj.body();
            let vx_before = body.vx;
            let report = step_body(&mut body, half_w, half_h, grid, &self.physics, dt);

            if let Some((coord, direction)) = report.hit_wall
                && vx_before.abs() > self.config.moving_threshold
            {
                body.vx = -vx_before;
                obj.set_facing_right(body.vx > 0.0);
                if obj.kind == HoldableKind::Shell
                    && grid.get(coord).is_some_and(|t| t.is_interactive())
                {
                    hits.push(TileHit {
                        coord,
                        direction,
                        by: EntityRef::Holdable(entity),
                    });
                }
            }
            if report.grounded && obj.kind == HoldableKind::Bobomb {
                let slow = BOBOMB_GROUND_FRICTION * dt;
                body.vx = if body.vx.abs() <= slow {
                    0.0
                } else {
                    body.vx - slow * body.vx.signum()
                };
            }
            obj.set_body(body);
            if report.fell_out {
                fell_out.push(entity);
            }
        }

        for entity in fell_out {
            self.kill(entity);
        }

        // Overlaps between owned free entities and players.
        let mut contacts = Vec::new();
        for (entity, obj) in self.holdables.iter() {
            if obj.is_dead() || obj.holder().is_some() || !local.may_write(obj.writer()) {
                continue;
            }
            let (half_w, half_h) = obj.kind.half_extents();
            let collider = Aabb::around(&obj.body(), half_w, half_h);
            for agent in self.players.values() {
                if agent.collider().overlaps(&collider) {
                    contacts.push((entity, agent.id));
                }
            }
        }
        for (entity, agent) in contacts {
            self.interact_with_player(clock, entity, agent);
        }

        self.snap_held();
        hits
    }

    // ========================================================================
    // Replication
    // ========================================================================

    /// Changed fields of owned entities, preceded by the owners of every
    /// other entity when a late joiner needs them.
    pub fn collect_updates(&mut self) -> Vec<PropertyUpdate<HoldableField>> {
        let mut updates = Vec::new();
        if std::mem::take(&mut self.announce_owners) && self.local.is_authority {
            updates = self.holdables.announce_ownership(&self.local);
        }
        updates.extend(self.holdables.collect_updates(&self.local));
        updates
    }

    /// Apply updates from `origin`, then restore the holding relation and
    /// snap held entities.
    ///
    /// An owner announcement from the authority that names this participant
    /// at its current generation means someone joined late; those entities
    /// are resent in full. Entities handed back to the authority are resent
    /// in full by it.
    pub fn apply_updates(
        &mut self,
        origin: &Participant,
        updates: Vec<PropertyUpdate<HoldableField>>,
    ) -> Vec<EntityId> {
        let local = self.local;
        let confirmed: Vec<EntityId> = if origin.is_authority && !local.is_authority {
            updates
                .iter()
                .filter_map(|update| {
                    let claim = HoldableEntity::announced_ownership(&update.field)?;
                    let obj = self.holdables.get(update.entity)?;
                    (local.may_write(claim.writer) && obj.ownership() == claim)
                        .then_some(update.entity)
                })
                .collect()
        } else {
            Vec::new()
        };
        let foreign: Vec<EntityId> = if local.is_authority {
            self.holdables
                .iter()
                .filter(|(_, obj)| !local.may_write(obj.writer()))
                .map(|(id, _)| id)
                .collect()
        } else {
            Vec::new()
        };

        let touched = self.holdables.apply_updates(origin, updates);

        for entity in confirmed {
            if let Some(obj) = self.holdables.get_mut(entity) {
                obj.mark_all_dirty();
            }
        }
        for entity in foreign {
            if let Some(obj) = self.holdables.get_mut(entity)
                && local.may_write(obj.writer())
            {
                obj.mark_all_dirty();
                tracing::trace!(entity, "Entity returned to the authority");
            }
        }
        if !touched.is_empty() {
            self.rebuild_holding();
        }
        self.snap_held();
        touched
    }

    /// Someone joined after the match started. The authority resends what it
    /// writes and announces who writes the rest; the other writers resend
    /// once they see that announcement.
    pub fn resync_late_joiner(&mut self) {
        let local = self.local;
        if !local.is_authority {
            return;
        }
        for (_, obj) in self.holdables.iter_mut() {
            if local.may_write(obj.writer()) {
                obj.mark_all_dirty();
            }
        }
        self.announce_owners = true;
    }
}

impl SpatialQuery for Arena {
    fn overlap_box(
        &self,
        center: (f32, f32),
        size: (f32, f32),
        capacity: usize,
        out: &mut Vec<EntityRef>,
    ) -> usize {
        out.clear();
        let query = Aabb::from_center_size(center, size);
        for agent in self.players.values() {
            if out.len() >= capacity {
                return out.len();
            }
            if agent.collider().overlaps(&query) {
                out.push(EntityRef::Player(agent.id));
            }
        }
        for (entity, obj) in self.holdables.iter() {
            if out.len() >= capacity {
                break;
            }
            if obj.is_dead() {
                continue;
            }
            let (half_w, half_h) = obj.kind.half_extents();
            if Aabb::around(&obj.body(), half_w, half_h).overlaps(&query) {
                out.push(EntityRef::Holdable(entity));
            }
        }
        out.len()
    }
}

impl BumpTarget for Arena {
    fn is_bumpable(&self, target: EntityRef) -> bool {
        match target {
            EntityRef::Player(id) => self.players.contains_key(&id),
            EntityRef::Holdable(id) => self
                .holdables
                .get(id)
                .is_some_and(|obj| !obj.is_dead() && obj.holder().is_none()),
        }
    }

    fn block_bump(
        &mut self,
        target: EntityRef,
        interacter: EntityRef,
        tile: TileCoord,
        _direction: InteractionDirection,
    ) {
        match target {
            EntityRef::Player(player) => {
                self.effects.push(ArenaEffect::PlayerBumped {
                    player,
                    by: interacter,
                });
            },
            EntityRef::Holdable(entity) => {
                let local = self.local;
                let hop = self.config.bump_hop_speed;
                let Some(obj) = self.holdables.get_mut(entity) else {
                    return;
                };
                if !local.may_write(obj.writer()) {
                    return;
                }
                let (tile_x, _) = tile_to_world(tile);
                let mut body = obj.body();
                let right = body.x > tile_x + TILE_SIZE / 2.0;
                body.vy = hop;
                body.vx = if right { body.vx.abs() } else { -body.vx.abs() };
                obj.set_facing_right(right);
                obj.set_body(body);
                self.effects.push(ArenaEffect::HoldableBumped { entity });
            },
        }
    }
}
