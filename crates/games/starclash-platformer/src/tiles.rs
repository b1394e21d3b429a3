//! Tile mutation commands: applying them to a grid and deciding which ones a
//! tile interaction produces.
//!
//! Application is idempotent, so replaying cached commands to a late joiner
//! reproduces the live grid.

use serde::{Deserialize, Serialize};

use starclash_core::net::messages::{
    BumpTileMsg, MatchEvent, SetTileBatchMsg, SetTileMsg, SpawnParticleMsg,
};
use starclash_core::tile::{InteractionDirection, SpawnResult, Tile, TileCoord};

use crate::holdable::HoldableKind;
use crate::level::TileGrid;

/// Particle effect shown when a brick breaks.
pub const BRICK_BREAK_PARTICLE: &str = "BrickBreak";
/// Brick fragment color.
const BRICK_COLOR: [f32; 3] = [0.83, 0.47, 0.18];

/// What bumped blocks release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    pub question_spawn: SpawnResult,
    pub hidden_spawn: SpawnResult,
    /// Seconds from a bump until the cell is restored.
    pub bump_restore_secs: f32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            question_spawn: SpawnResult::Coin,
            hidden_spawn: SpawnResult::Star1Up,
            bump_restore_secs: 0.25,
        }
    }
}

/// The thing that hit a tile, as far as tile rules care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hitter {
    Player { big: bool },
    Holdable(HoldableKind),
}

/// Apply a grid command. Returns true if it was a grid command; other events
/// are left untouched.
pub fn apply_tile_event(grid: &mut TileGrid, event: &MatchEvent) -> bool {
    match event {
        MatchEvent::SetTile(msg) => {
            if !grid.set(TileCoord::new(msg.x, msg.y), msg.tile) {
                tracing::debug!(x = msg.x, y = msg.y, "SetTile outside the grid dropped");
            }
        },
        MatchEvent::SetTileBatch(msg) => {
            let expected = msg.width as usize * msg.height as usize;
            if msg.tiles.len() != expected {
                tracing::debug!(
                    expected,
                    actual = msg.tiles.len(),
                    "SetTileBatch length mismatch, missing cells cleared"
                );
            }
            let written = grid.set_block(
                TileCoord::new(msg.x, msg.y),
                msg.width,
                msg.height,
                &msg.tiles,
            );
            if written < expected {
                tracing::debug!(
                    dropped = expected - written,
                    "SetTileBatch cells outside the grid dropped"
                );
            }
        },
        MatchEvent::BumpTile(msg) => {
            if !grid.set(TileCoord::new(msg.x, msg.y), None) {
                tracing::debug!(x = msg.x, y = msg.y, "BumpTile outside the grid dropped");
            }
        },
        MatchEvent::ResetTiles(_) => grid.reset(),
        _ => return false,
    }
    true
}

/// Events the authority sends when `hitter` strikes `tile` at `coord`. Empty
/// when the tile does not react.
pub fn resolve_interaction(
    tile: Option<Tile>,
    coord: TileCoord,
    hitter: Hitter,
    direction: InteractionDirection,
    config: &TileConfig,
) -> Vec<MatchEvent> {
    let Some(tile) = tile else {
        return Vec::new();
    };
    let from_above = direction == InteractionDirection::Down;
    let bump = |result: Tile, spawn: SpawnResult| {
        MatchEvent::BumpTile(BumpTileMsg {
            x: coord.x,
            y: coord.y,
            from_above,
            result_tile: Some(result),
            spawn,
        })
    };

    match tile {
        Tile::Question => vec![bump(Tile::Used, config.question_spawn)],
        Tile::Hidden if direction == InteractionDirection::Up => {
            vec![bump(Tile::Used, config.hidden_spawn)]
        },
        Tile::Brick => {
            let breaks = match hitter {
                Hitter::Player { big } => big && direction == InteractionDirection::Up,
                Hitter::Holdable(HoldableKind::Shell) => direction.is_horizontal(),
                Hitter::Holdable(_) => false,
            };
            if breaks {
                vec![
                    MatchEvent::SetTile(SetTileMsg {
                        x: coord.x,
                        y: coord.y,
                        tile: None,
                    }),
                    MatchEvent::SpawnParticle(SpawnParticleMsg {
                        x: coord.x,
                        y: coord.y,
                        name: BRICK_BREAK_PARTICLE.to_string(),
                        color: BRICK_COLOR,
                    }),
                ]
            } else {
                vec![bump(Tile::Brick, SpawnResult::None)]
            }
        },
        _ => Vec::new(),
    }
}

/// Build a batch command covering `width * height` cells from `origin`.
pub fn batch(origin: TileCoord, width: u32, height: u32, tiles: Vec<Option<Tile>>) -> MatchEvent {
    MatchEvent::SetTileBatch(SetTileBatchMsg {
        x: origin.x,
        y: origin.y,
        width,
        height,
        tiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelBounds;
    use starclash_core::net::messages::ResetTilesMsg;

    fn grid() -> TileGrid {
        let bounds = LevelBounds {
            min_x: -4,
            min_y: -2,
            width: 8,
            height: 6,
        };
        let mut cells = vec![None; 48];
        cells[0] = Some(Tile::Ground);
        cells[20] = Some(Tile::Brick);
        TileGrid::from_cells(bounds, cells).unwrap()
    }

    fn set(x: i32, y: i32, tile: Option<Tile>) -> MatchEvent {
        MatchEvent::SetTile(SetTileMsg { x, y, tile })
    }

    #[test]
    fn set_tile_is_idempotent() {
        let mut g = grid();
        let event = set(1, 1, Some(Tile::Pipe));
        apply_tile_event(&mut g, &event);
        let once = g.clone();
        apply_tile_event(&mut g, &event);
        assert_eq!(g, once);
        assert_eq!(g.get(TileCoord::new(1, 1)), Some(Tile::Pipe));
    }

    #[test]
    fn batch_clears_missing_entries() {
        let mut g = grid();
        g.set(TileCoord::new(0, 0), Some(Tile::Ground));
        g.set(TileCoord::new(1, 0), Some(Tile::Ground));
        apply_tile_event(
            &mut g,
            &batch(TileCoord::new(0, 0), 2, 1, vec![None, Some(Tile::Brick)]),
        );
        assert_eq!(g.get(TileCoord::new(0, 0)), None);
        assert_eq!(g.get(TileCoord::new(1, 0)), Some(Tile::Brick));
    }

    #[test]
    fn batch_partially_outside_keeps_inside_cells() {
        let mut g = grid();
        // Columns 3 and 4: 4 is outside the grid.
        apply_tile_event(
            &mut g,
            &batch(
                TileCoord::new(3, 0),
                2,
                2,
                vec![Some(Tile::Pipe), Some(Tile::Pipe), Some(Tile::Used), Some(Tile::Used)],
            ),
        );
        assert_eq!(g.get(TileCoord::new(3, 0)), Some(Tile::Pipe));
        assert_eq!(g.get(TileCoord::new(3, 1)), Some(Tile::Used));
        assert_eq!(g.get(TileCoord::new(4, 0)), None);
    }

    #[test]
    fn short_batch_clears_tail() {
        let mut g = grid();
        g.set(TileCoord::new(1, 2), Some(Tile::Ground));
        apply_tile_event(
            &mut g,
            &batch(TileCoord::new(0, 2), 2, 1, vec![Some(Tile::Brick)]),
        );
        assert_eq!(g.get(TileCoord::new(0, 2)), Some(Tile::Brick));
        assert_eq!(g.get(TileCoord::new(1, 2)), None);
    }

    #[test]
    fn bump_clears_source_cell() {
        let mut g = grid();
        g.set(TileCoord::new(0, 1), Some(Tile::Question));
        let events = resolve_interaction(
            g.get(TileCoord::new(0, 1)),
            TileCoord::new(0, 1),
            Hitter::Player { big: false },
            InteractionDirection::Up,
            &TileConfig::default(),
        );
        assert_eq!(events.len(), 1);
        for e in &events {
            apply_tile_event(&mut g, e);
        }
        assert_eq!(g.get(TileCoord::new(0, 1)), None);
        match &events[0] {
            MatchEvent::BumpTile(msg) => {
                assert_eq!(msg.result_tile, Some(Tile::Used));
                assert_eq!(msg.spawn, SpawnResult::Coin);
                assert!(!msg.from_above);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_restores_snapshot() {
        let mut g = grid();
        let pristine = g.clone();
        for i in 0..10 {
            apply_tile_event(&mut g, &set(i % 4, 1, Some(Tile::Pipe)));
            apply_tile_event(&mut g, &set(-4, -2, None));
        }
        assert!(!g.is_pristine());
        assert!(apply_tile_event(&mut g, &MatchEvent::ResetTiles(ResetTilesMsg {})));
        assert!(g.is_pristine());
        assert_eq!(g, pristine);
    }

    #[test]
    fn non_tile_event_ignored() {
        let mut g = grid();
        let event = MatchEvent::EndGame(starclash_core::net::messages::EndGameMsg { winner: 1 });
        assert!(!apply_tile_event(&mut g, &event));
    }

    // ========================================================================
    // Interaction rules
    // ========================================================================

    fn resolve(tile: Tile, hitter: Hitter, direction: InteractionDirection) -> Vec<MatchEvent> {
        resolve_interaction(
            Some(tile),
            TileCoord::new(2, 3),
            hitter,
            direction,
            &TileConfig::default(),
        )
    }

    #[test]
    fn big_player_breaks_brick_from_below() {
        let events = resolve(Tile::Brick, Hitter::Player { big: true }, InteractionDirection::Up);
        assert!(matches!(&events[0], MatchEvent::SetTile(m) if m.tile.is_none()));
        assert!(matches!(
            &events[1],
            MatchEvent::SpawnParticle(m) if m.name == BRICK_BREAK_PARTICLE
        ));
    }

    #[test]
    fn small_player_bumps_brick() {
        let small = Hitter::Player { big: false };
        let events = resolve(Tile::Brick, small, InteractionDirection::Up);
        assert!(matches!(
            &events[..],
            [MatchEvent::BumpTile(m)] if m.result_tile == Some(Tile::Brick)
        ));
    }

    #[test]
    fn shell_breaks_brick_from_side() {
        let events = resolve(
            Tile::Brick,
            Hitter::Holdable(HoldableKind::Shell),
            InteractionDirection::Left,
        );
        assert!(matches!(&events[0], MatchEvent::SetTile(_)));
    }

    #[test]
    fn hidden_block_only_from_below() {
        let small = Hitter::Player { big: false };
        assert!(resolve(Tile::Hidden, small, InteractionDirection::Down).is_empty());
        let events = resolve(Tile::Hidden, small, InteractionDirection::Up);
        assert!(matches!(
            &events[..],
            [MatchEvent::BumpTile(m)] if m.result_tile == Some(Tile::Used)
        ));
    }

    #[test]
    fn ground_pound_bump_is_from_above() {
        let big = Hitter::Player { big: true };
        let events = resolve(Tile::Question, big, InteractionDirection::Down);
        assert!(matches!(&events[..], [MatchEvent::BumpTile(m)] if m.from_above));
    }

    #[test]
    fn inert_tiles_do_nothing() {
        for tile in [Tile::Ground, Tile::Used, Tile::Pipe, Tile::Semisolid] {
            let big = Hitter::Player { big: true };
            assert!(resolve(tile, big, InteractionDirection::Up).is_empty());
        }
        assert!(
            resolve_interaction(
                None,
                TileCoord::new(0, 0),
                Hitter::Player { big: true },
                InteractionDirection::Up,
                &TileConfig::default(),
            )
            .is_empty()
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn tile_strategy() -> impl Strategy<Value = Option<Tile>> {
            prop_oneof![
                Just(None),
                Just(Some(Tile::Ground)),
                Just(Some(Tile::Brick)),
                Just(Some(Tile::Question)),
                Just(Some(Tile::Used)),
                Just(Some(Tile::Pipe)),
            ]
        }

        fn event_strategy() -> impl Strategy<Value = MatchEvent> {
            prop_oneof![
                (-6i32..6, -3i32..6, tile_strategy()).prop_map(|(x, y, t)| set(x, y, t)),
                (
                    -6i32..6,
                    -3i32..6,
                    1u32..4,
                    1u32..4,
                    proptest::collection::vec(tile_strategy(), 0..12)
                )
                    .prop_map(|(x, y, w, h, tiles)| batch(TileCoord::new(x, y), w, h, tiles)),
            ]
        }

        proptest! {
            /// A late joiner replaying the cached commands (with the first
            /// few delivered twice) ends with the live grid.
            #[test]
            fn cached_replay_matches_live(
                events in proptest::collection::vec(event_strategy(), 0..30),
                dup in 0usize..5,
            ) {
                let mut live = grid();
                for e in &events {
                    apply_tile_event(&mut live, e);
                }

                let mut joiner = grid();
                let dup = dup.min(events.len());
                for e in events.iter().take(dup) {
                    apply_tile_event(&mut joiner, e);
                }
                for e in &events {
                    apply_tile_event(&mut joiner, e);
                }
                prop_assert_eq!(joiner.cells(), live.cells());
            }
        }
    }
}
