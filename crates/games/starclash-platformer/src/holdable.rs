//! Holdable entities: shells and bob-ombs that players pick up, carry, throw
//! and kick.
//!
//! Every field another participant needs is a [`Replicated`] value written
//! only by the entity's current [`Writer`]. The transitions that involve a
//! player agent live on [`crate::arena::Arena`], which owns the agent side of
//! the holding relation.

use serde::{Deserialize, Serialize};

use starclash_core::clock::{SimClock, TickTimer};
use starclash_core::net::messages::{HoldableField, Kinematics};
use starclash_core::player::PlayerId;
use starclash_core::replicated::{Ownership, Replicated, ReplicatedObject, Writer};

/// Kinds of holdable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldableKind {
    Shell,
    Bobomb,
}

impl HoldableKind {
    /// Whether a crouching throw gently sets the entity down.
    pub fn can_place(self) -> bool {
        matches!(self, Self::Bobomb)
    }

    pub fn can_kick(self) -> bool {
        true
    }

    /// Collider half extents.
    pub fn half_extents(self) -> (f32, f32) {
        match self {
            Self::Shell => (0.2, 0.15),
            Self::Bobomb => (0.2, 0.2),
        }
    }
}

/// Tunables for holding, throwing and kicking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldableConfig {
    pub throw_speed: f32,
    /// Horizontal speed of a crouching throw for entities that can be placed.
    pub place_speed: f32,
    /// Length of the window in which a thrown entity ignores its thrower.
    pub throw_invincibility_secs: f32,
    /// Offset from the holder's position while carried, for a holder facing right.
    pub holder_offset: (f32, f32),
    pub shell_kick_speed: f32,
    /// Upward speed of a shell kicked with a ground pound.
    pub shell_groundpound_lift: f32,
    pub bobomb_kick_speed: f32,
    /// Upward speed of a kicked bob-omb.
    pub bobomb_kick_lift: f32,
    /// Upward speed of a bob-omb kicked with a ground pound.
    pub groundpound_kick_lift: f32,
    /// Upward speed given to an entity bumped from below.
    pub bump_hop_speed: f32,
    /// Speed above which a shell counts as moving.
    pub moving_threshold: f32,
    /// Launch speed of a corpse after a special kill.
    pub corpse_launch_speed: f32,
}

impl Default for HoldableConfig {
    fn default() -> Self {
        Self {
            throw_speed: 4.5,
            place_speed: 2.0,
            throw_invincibility_secs: 0.2,
            holder_offset: (0.25, 0.1),
            shell_kick_speed: 4.5,
            shell_groundpound_lift: 3.5,
            bobomb_kick_speed: 4.5,
            bobomb_kick_lift: 3.5,
            groundpound_kick_lift: 6.0,
            bump_hop_speed: 5.5,
            moving_threshold: 0.5,
            corpse_launch_speed: 2.5,
        }
    }
}

/// Coarse state of a holdable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Free,
    Held(PlayerId),
    Dead,
}

#[derive(Debug, Clone)]
pub struct HoldableEntity {
    pub kind: HoldableKind,
    pub can_place: bool,
    pub can_kick: bool,
    owner: Replicated<Ownership>,
    holder: Replicated<Option<PlayerId>>,
    previous_holder: Replicated<Option<PlayerId>>,
    throw_invincibility: Replicated<TickTimer>,
    facing_right: Replicated<bool>,
    dead: Replicated<bool>,
    body: Replicated<Kinematics>,
    /// Writer to pass the entity to once the current changes are sent.
    handoff: Option<Writer>,
}

impl HoldableEntity {
    /// A freshly spawned, authority-owned entity at rest.
    pub fn spawn(kind: HoldableKind, x: f32, y: f32) -> Self {
        Self {
            kind,
            can_place: kind.can_place(),
            can_kick: kind.can_kick(),
            owner: Replicated::new(Ownership::new(Writer::Authority)),
            holder: Replicated::new(None),
            previous_holder: Replicated::new(None),
            throw_invincibility: Replicated::new(TickTimer::NONE),
            facing_right: Replicated::new(false),
            dead: Replicated::new(false),
            body: Replicated::new(Kinematics {
                x,
                y,
                ..Default::default()
            }),
            handoff: None,
        }
    }

    pub fn holder(&self) -> Option<PlayerId> {
        self.holder.value()
    }

    pub fn previous_holder(&self) -> Option<PlayerId> {
        self.previous_holder.value()
    }

    pub fn throw_invincibility(&self) -> TickTimer {
        self.throw_invincibility.value()
    }

    pub fn facing_right(&self) -> bool {
        self.facing_right.value()
    }

    pub fn is_dead(&self) -> bool {
        self.dead.value()
    }

    pub fn body(&self) -> Kinematics {
        self.body.value()
    }

    pub fn state(&self) -> HoldState {
        if self.is_dead() {
            HoldState::Dead
        } else if let Some(holder) = self.holder() {
            HoldState::Held(holder)
        } else {
            HoldState::Free
        }
    }

    /// Writer the entity will have once pending changes are sent.
    pub fn effective_writer(&self) -> Writer {
        self.handoff.unwrap_or(self.owner.value().writer)
    }

    pub fn is_moving(&self, threshold: f32) -> bool {
        self.body().vx.abs() > threshold
    }

    /// The previous holder is still immune to this entity.
    pub fn shields_previous_holder(&self, agent: PlayerId, clock: &SimClock) -> bool {
        self.previous_holder() == Some(agent) && self.throw_invincibility().is_running(clock)
    }

    // Local writes. Callers check the writer first.

    pub(crate) fn set_holder(&mut self, holder: Option<PlayerId>) {
        self.holder.set(holder);
    }

    pub(crate) fn set_previous_holder(&mut self, previous: Option<PlayerId>) {
        self.previous_holder.set(previous);
    }

    pub(crate) fn set_throw_invincibility(&mut self, timer: TickTimer) {
        self.throw_invincibility.set(timer);
    }

    pub(crate) fn set_facing_right(&mut self, facing_right: bool) {
        self.facing_right.set(facing_right);
    }

    pub(crate) fn set_dead(&mut self) {
        self.dead.set(true);
    }

    pub(crate) fn set_body(&mut self, body: Kinematics) {
        self.body.set(body);
    }

    /// Queue a change of writer, sent after the current changes.
    pub(crate) fn hand_over(&mut self, next: Writer) {
        self.handoff = Some(next);
    }

    /// Switch writer without announcing it. Used when every participant makes
    /// the same decision locally, e.g. when the writer leaves the match.
    pub(crate) fn reclaim(&mut self, writer: Writer) {
        self.handoff = None;
        let next = self.owner.value().succeeded_by(writer);
        self.owner.apply_remote(next);
    }

    /// Held entities copy their holder's position, zero velocity. Not a
    /// replicated write: every participant snaps locally.
    pub(crate) fn snap_to(
        &mut self,
        holder: &Kinematics,
        holder_facing_right: bool,
        offset: (f32, f32),
    ) {
        let dx = if holder_facing_right { offset.0 } else { -offset.0 };
        let snapped = Kinematics {
            x: holder.x + dx,
            y: holder.y + offset.1,
            vx: 0.0,
            vy: 0.0,
        };
        self.body.apply_remote(snapped);
    }

    /// Mark every field for the next sync, so a participant that joined late
    /// receives the full state. The owner goes first, so a receiver with an
    /// outdated owner accepts the fields after it.
    pub(crate) fn mark_all_dirty(&mut self) {
        self.owner.mark_dirty();
        self.holder.mark_dirty();
        self.previous_holder.mark_dirty();
        self.throw_invincibility.mark_dirty();
        self.facing_right.mark_dirty();
        self.dead.mark_dirty();
        self.body.mark_dirty();
    }
}

impl ReplicatedObject for HoldableEntity {
    type Field = HoldableField;

    fn ownership(&self) -> Ownership {
        self.owner.value()
    }

    fn ownership_field(ownership: Ownership) -> HoldableField {
        HoldableField::Owner(ownership)
    }

    fn announced_ownership(field: &HoldableField) -> Option<Ownership> {
        match field {
            HoldableField::Owner(v) => Some(*v),
            _ => None,
        }
    }

    fn take_changes(&mut self) -> Vec<HoldableField> {
        let mut out = Vec::new();
        if let Some(v) = self.owner.take_dirty() {
            out.push(HoldableField::Owner(v));
        }
        if let Some(v) = self.holder.take_dirty() {
            out.push(HoldableField::Holder(v));
        }
        if let Some(v) = self.previous_holder.take_dirty() {
            out.push(HoldableField::PreviousHolder(v));
        }
        if let Some(v) = self.throw_invincibility.take_dirty() {
            out.push(HoldableField::ThrowInvincibility(v));
        }
        if let Some(v) = self.facing_right.take_dirty() {
            out.push(HoldableField::FacingRight(v));
        }
        if let Some(v) = self.dead.take_dirty() {
            out.push(HoldableField::Dead(v));
        }
        if let Some(v) = self.body.take_dirty() {
            out.push(HoldableField::Body(v));
        }
        out
    }

    fn apply_field(&mut self, field: HoldableField) {
        match field {
            HoldableField::Owner(v) => {
                self.handoff = None;
                self.owner.apply_remote(v);
            },
            HoldableField::Holder(v) => self.holder.apply_remote(v),
            HoldableField::PreviousHolder(v) => self.previous_holder.apply_remote(v),
            HoldableField::ThrowInvincibility(v) => self.throw_invincibility.apply_remote(v),
            HoldableField::FacingRight(v) => self.facing_right.apply_remote(v),
            HoldableField::Dead(v) => self.dead.apply_remote(v),
            HoldableField::Body(v) => self.body.apply_remote(v),
        }
    }

    fn take_handoff(&mut self) -> Option<HoldableField> {
        let next = self.handoff.take()?;
        let current = self.owner.value();
        if next == current.writer {
            return None;
        }
        let next = current.succeeded_by(next);
        self.owner.apply_remote(next);
        Some(HoldableField::Owner(next))
    }
}
