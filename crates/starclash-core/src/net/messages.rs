use serde::{Deserialize, Serialize};

use crate::clock::{Tick, TickTimer};
use crate::player::PlayerId;
use crate::replicated::{EntityId, EntityRef, Ownership, PropertyUpdate};
use crate::tile::{InteractionDirection, SpawnResult, Tile};

/// Wire discriminator for every match event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    // Replication (0x0x)
    PropertySync = 0x01,
    PickupRequest = 0x02,
    TileInteractRequest = 0x03,
    // Tile mutation (0x1x)
    SetTile = 0x10,
    SetTileBatch = 0x11,
    BumpTile = 0x12,
    ResetTiles = 0x13,
    // Presentation (0x18+)
    SpawnParticle = 0x18,
    SpawnDestructiblePipe = 0x19,
    // Match flow (0x2x)
    PlayerFinishedLoading = 0x20,
    SpawnEnemies = 0x21,
    EndGame = 0x22,
    // Stars (0x3x)
    SpawnStar = 0x30,
    CollectStar = 0x31,
}

impl EventKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::PropertySync),
            0x02 => Some(Self::PickupRequest),
            0x03 => Some(Self::TileInteractRequest),
            0x10 => Some(Self::SetTile),
            0x11 => Some(Self::SetTileBatch),
            0x12 => Some(Self::BumpTile),
            0x13 => Some(Self::ResetTiles),
            0x18 => Some(Self::SpawnParticle),
            0x19 => Some(Self::SpawnDestructiblePipe),
            0x20 => Some(Self::PlayerFinishedLoading),
            0x21 => Some(Self::SpawnEnemies),
            0x22 => Some(Self::EndGame),
            0x30 => Some(Self::SpawnStar),
            0x31 => Some(Self::CollectStar),
            _ => None,
        }
    }

    /// Commands that change the tile grid and are cached for late joiners.
    pub fn is_tile_mutation(self) -> bool {
        matches!(self, Self::SetTile | Self::SetTileBatch | Self::BumpTile)
    }
}

/// Position and velocity of a physics body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// One replicated field of a holdable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HoldableField {
    Owner(Ownership),
    Holder(Option<PlayerId>),
    PreviousHolder(Option<PlayerId>),
    ThrowInvincibility(TickTimer),
    FacingRight(bool),
    Dead(bool),
    Body(Kinematics),
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySyncMsg {
    pub tick: Tick,
    pub updates: Vec<PropertyUpdate<HoldableField>>,
}

/// Sent by a non-authority participant whose agent wants to grab an
/// authority-owned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRequestMsg {
    pub entity: EntityId,
    pub agent: PlayerId,
}

/// Sent by a non-authority participant when one of its colliders hits an
/// interactive tile. The authority decides what happens to the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileInteractRequestMsg {
    pub x: i32,
    pub y: i32,
    pub direction: InteractionDirection,
    pub interacter: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTileMsg {
    pub x: i32,
    pub y: i32,
    pub tile: Option<Tile>,
}

/// Rectangular block in row-major order, bottom row first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTileBatchMsg {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<Option<Tile>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BumpTileMsg {
    pub x: i32,
    pub y: i32,
    pub from_above: bool,
    pub result_tile: Option<Tile>,
    pub spawn: SpawnResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetTilesMsg {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnParticleMsg {
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub color: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnDestructiblePipeMsg {
    pub x: f32,
    pub y: f32,
    pub right: bool,
    pub upside_down: bool,
    pub size: u32,
    pub already_destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFinishedLoadingMsg {
    pub player: PlayerId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnEnemiesMsg {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndGameMsg {
    pub winner: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnStarMsg {
    pub spawn_index: u32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectStarMsg {
    pub player: PlayerId,
}

// ============================================================================
// Event enum
// ============================================================================

/// Every event exchanged between participants during a match.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    PropertySync(PropertySyncMsg),
    PickupRequest(PickupRequestMsg),
    TileInteractRequest(TileInteractRequestMsg),
    SetTile(SetTileMsg),
    SetTileBatch(SetTileBatchMsg),
    BumpTile(BumpTileMsg),
    ResetTiles(ResetTilesMsg),
    SpawnParticle(SpawnParticleMsg),
    SpawnDestructiblePipe(SpawnDestructiblePipeMsg),
    PlayerFinishedLoading(PlayerFinishedLoadingMsg),
    SpawnEnemies(SpawnEnemiesMsg),
    EndGame(EndGameMsg),
    SpawnStar(SpawnStarMsg),
    CollectStar(CollectStarMsg),
}

impl MatchEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PropertySync(_) => EventKind::PropertySync,
            Self::PickupRequest(_) => EventKind::PickupRequest,
            Self::TileInteractRequest(_) => EventKind::TileInteractRequest,
            Self::SetTile(_) => EventKind::SetTile,
            Self::SetTileBatch(_) => EventKind::SetTileBatch,
            Self::BumpTile(_) => EventKind::BumpTile,
            Self::ResetTiles(_) => EventKind::ResetTiles,
            Self::SpawnParticle(_) => EventKind::SpawnParticle,
            Self::SpawnDestructiblePipe(_) => EventKind::SpawnDestructiblePipe,
            Self::PlayerFinishedLoading(_) => EventKind::PlayerFinishedLoading,
            Self::SpawnEnemies(_) => EventKind::SpawnEnemies,
            Self::EndGame(_) => EventKind::EndGame,
            Self::SpawnStar(_) => EventKind::SpawnStar,
            Self::CollectStar(_) => EventKind::CollectStar,
        }
    }
}
