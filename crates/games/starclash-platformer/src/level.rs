use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use starclash_core::tile::{Tile, TileCoord};

use crate::holdable::HoldableKind;

/// Tile edge length in world units.
pub const TILE_SIZE: f32 = 0.5;

/// Spawn ring radius for player placement.
const SPAWN_RING_SIZE: f32 = 1.39;
/// Vertical squash of the spawn ring.
const SPAWN_RING_Y_SCALE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelError {
    ZeroSize,
    LengthMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for LevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "level bounds must be at least one tile"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} tiles, got {actual}")
            },
        }
    }
}

impl std::error::Error for LevelError {}

/// Rectangular tile-space bounds of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub width: u32,
    pub height: u32,
}

impl LevelBounds {
    pub fn contains(&self, coord: TileCoord) -> bool {
        coord.x >= self.min_x
            && coord.y >= self.min_y
            && i64::from(coord.x) < i64::from(self.min_x) + i64::from(self.width)
            && i64::from(coord.y) < i64::from(self.min_y) + i64::from(self.height)
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn min_world_x(&self) -> f32 {
        self.min_x as f32 * TILE_SIZE
    }

    pub fn max_world_x(&self) -> f32 {
        (self.min_x as f32 + self.width as f32) * TILE_SIZE
    }

    pub fn world_width(&self) -> f32 {
        self.width as f32 * TILE_SIZE
    }
}

/// The mutable tile layer of a level plus the snapshot taken when it was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    bounds: LevelBounds,
    /// Row-major, bottom row first.
    cells: Vec<Option<Tile>>,
    original: Vec<Option<Tile>>,
}

impl TileGrid {
    pub fn empty(bounds: LevelBounds) -> Result<Self, LevelError> {
        Self::from_cells(bounds, vec![None; bounds.cell_count()])
    }

    pub fn from_cells(bounds: LevelBounds, cells: Vec<Option<Tile>>) -> Result<Self, LevelError> {
        if bounds.width == 0 || bounds.height == 0 {
            return Err(LevelError::ZeroSize);
        }
        if cells.len() != bounds.cell_count() {
            return Err(LevelError::LengthMismatch {
                expected: bounds.cell_count(),
                actual: cells.len(),
            });
        }
        Ok(Self {
            bounds,
            original: cells.clone(),
            cells,
        })
    }

    pub fn bounds(&self) -> LevelBounds {
        self.bounds
    }

    fn index(&self, coord: TileCoord) -> Option<usize> {
        if !self.bounds.contains(coord) {
            return None;
        }
        let col = (coord.x - self.bounds.min_x) as usize;
        let row = (coord.y - self.bounds.min_y) as usize;
        Some(row * self.bounds.width as usize + col)
    }

    /// Tile at `coord`. Out-of-bounds cells read as empty.
    pub fn get(&self, coord: TileCoord) -> Option<Tile> {
        self.index(coord).and_then(|i| self.cells[i])
    }

    pub fn original(&self, coord: TileCoord) -> Option<Tile> {
        self.index(coord).and_then(|i| self.original[i])
    }

    /// Assign one cell. Returns `false` when `coord` is outside the grid.
    pub fn set(&mut self, coord: TileCoord, tile: Option<Tile>) -> bool {
        match self.index(coord) {
            Some(i) => {
                self.cells[i] = tile;
                true
            },
            None => false,
        }
    }

    /// Assign a `width` x `height` block starting at `origin`, row-major and
    /// bottom row first. Missing entries clear their cell, extra entries are
    /// ignored and cells outside the grid are skipped one by one.
    ///
    /// Returns the number of cells written.
    pub fn set_block(
        &mut self,
        origin: TileCoord,
        width: u32,
        height: u32,
        tiles: &[Option<Tile>],
    ) -> usize {
        // Only the part of the block that overlaps the grid is visited.
        let b = self.bounds;
        let (ox, oy) = (i64::from(origin.x), i64::from(origin.y));
        let x0 = ox.max(i64::from(b.min_x));
        let x1 = (ox + i64::from(width)).min(i64::from(b.min_x) + i64::from(b.width));
        let y0 = oy.max(i64::from(b.min_y));
        let y1 = (oy + i64::from(height)).min(i64::from(b.min_y) + i64::from(b.height));

        let mut written = 0;
        for y in y0..y1 {
            for x in x0..x1 {
                let i = (y - oy) as usize * width as usize + (x - ox) as usize;
                let tile = tiles.get(i).copied().flatten();
                if self.set(TileCoord::new(x as i32, y as i32), tile) {
                    written += 1;
                }
            }
        }
        written
    }

    /// Restore the snapshot taken at construction.
    pub fn reset(&mut self) {
        self.cells.clone_from(&self.original);
    }

    pub fn is_pristine(&self) -> bool {
        self.cells == self.original
    }

    pub fn cells(&self) -> &[Option<Tile>] {
        &self.cells
    }

    pub fn is_solid(&self, coord: TileCoord) -> bool {
        self.get(coord).is_some_and(Tile::is_solid)
    }

    pub fn is_solid_at_world(&self, x: f32, y: f32) -> bool {
        self.is_solid(world_to_tile(x, y))
    }
}

/// Cell containing the world point `(x, y)`.
pub fn world_to_tile(x: f32, y: f32) -> TileCoord {
    TileCoord::new((x / TILE_SIZE).floor() as i32, (y / TILE_SIZE).floor() as i32)
}

/// World position of the bottom-left corner of a cell.
pub fn tile_to_world(coord: TileCoord) -> (f32, f32) {
    (coord.x as f32 * TILE_SIZE, coord.y as f32 * TILE_SIZE)
}

/// Where a level places an enemy when the match activates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnemySpawn {
    pub kind: HoldableKind,
    pub x: f32,
    pub y: f32,
}

/// A playable level: tiles plus the points the match lifecycle needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub grid: TileGrid,
    pub spawn_point: (f32, f32),
    pub star_spawns: Vec<(f32, f32)>,
    pub enemy_spawns: Vec<EnemySpawn>,
}

impl Level {
    /// Starting position of the `index`-th of `players` players, spread on
    /// a ring around the spawn point and wrapped into the level horizontally.
    pub fn spawn_position(&self, index: usize, players: usize) -> (f32, f32) {
        let players = players.max(1) as f32;
        let angle = (index as f32 / players) * std::f32::consts::TAU
            + std::f32::consts::FRAC_PI_2
            + std::f32::consts::PI / (2.0 * players);
        let scale = (2.0 - (players + 1.0) / players) * SPAWN_RING_SIZE;
        let dy = if players > 2.0 {
            angle.cos() * scale * SPAWN_RING_Y_SCALE
        } else {
            0.0
        };
        let mut x = self.spawn_point.0 + angle.sin() * scale;
        let y = self.spawn_point.1 + dy;
        let bounds = self.grid.bounds();
        if x < bounds.min_world_x() {
            x += bounds.world_width();
        }
        if x > bounds.max_world_x() {
            x -= bounds.world_width();
        }
        (x, y)
    }
}

/// Chunk width in tiles.
const CHUNK_WIDTH: u32 = 8;
/// Number of chunks across the level.
const NUM_CHUNKS: u32 = 6;
/// Chunk that holds the player spawn and is kept clear.
const SPAWN_CHUNK: u32 = 3;
/// Level height in tiles.
pub const LEVEL_HEIGHT: u32 = 20;
/// Rows of ground at the bottom of the level.
const GROUND_ROWS: i32 = 2;

/// Build a deterministic level from a seed.
pub fn generate_level(seed: u64) -> Result<Level, LevelError> {
    let width = CHUNK_WIDTH * NUM_CHUNKS;
    let bounds = LevelBounds {
        min_x: -(width as i32) / 2,
        min_y: -6,
        width,
        height: LEVEL_HEIGHT,
    };
    let mut grid = TileGrid::empty(bounds)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let ground_top = bounds.min_y + GROUND_ROWS;
    for x in bounds.min_x..bounds.min_x + width as i32 {
        for y in bounds.min_y..ground_top {
            grid.set(TileCoord::new(x, y), Some(Tile::Ground));
        }
    }

    let mut star_spawns = Vec::new();
    let mut enemy_spawns = Vec::new();
    for chunk in 0..NUM_CHUNKS {
        let base_x = bounds.min_x + (chunk * CHUNK_WIDTH) as i32;
        if chunk == SPAWN_CHUNK {
            // A lone question block over the spawn.
            grid.set(TileCoord::new(base_x + 1, ground_top + 3), Some(Tile::Question));
            continue;
        }
        let star = generate_chunk(&mut grid, &mut rng, base_x, ground_top, &mut enemy_spawns);
        star_spawns.push(star);
    }

    // Rebuild so the snapshot matches the generated layout.
    let grid = TileGrid::from_cells(bounds, grid.cells().to_vec())?;
    let spawn_base = bounds.min_x + (SPAWN_CHUNK * CHUNK_WIDTH) as i32;
    let (sx, sy) = tile_to_world(TileCoord::new(spawn_base, ground_top));
    Ok(Level {
        grid,
        spawn_point: (sx, sy + 0.25),
        star_spawns,
        enemy_spawns,
    })
}

fn generate_chunk(
    grid: &mut TileGrid,
    rng: &mut StdRng,
    base_x: i32,
    ground_top: i32,
    enemies: &mut Vec<EnemySpawn>,
) -> (f32, f32) {
    let pattern = rng.random_range(0u8..4);
    let top = match pattern {
        0 => {
            // Brick row with a question block in it
            let y = ground_top + 3;
            let start = base_x + rng.random_range(1..3);
            let question = rng.random_range(1..4);
            for i in 0..5 {
                let tile = if i == question {
                    Tile::Question
                } else {
                    Tile::Brick
                };
                grid.set(TileCoord::new(start + i, y), Some(tile));
            }
            let (x, _) = tile_to_world(TileCoord::new(start + 2, y));
            enemies.push(EnemySpawn {
                kind: HoldableKind::Shell,
                x: x + 0.25,
                y: ground_top as f32 * TILE_SIZE + 0.25,
            });
            TileCoord::new(start + 2, y + 1)
        },
        1 => {
            // Pipe
            let height = rng.random_range(2..5);
            let x = base_x + rng.random_range(2..5);
            for dy in 0..height {
                grid.set(TileCoord::new(x, ground_top + dy), Some(Tile::Pipe));
                grid.set(TileCoord::new(x + 1, ground_top + dy), Some(Tile::Pipe));
            }
            TileCoord::new(x, ground_top + height)
        },
        2 => {
            // Semisolid ledge with a hidden block above it
            let y = ground_top + 2;
            let start = base_x + rng.random_range(0..2);
            let len = rng.random_range(4..7);
            for i in 0..len {
                grid.set(TileCoord::new(start + i, y), Some(Tile::Semisolid));
            }
            grid.set(TileCoord::new(start + len / 2, y + 4), Some(Tile::Hidden));
            let (x, _) = tile_to_world(TileCoord::new(start + 1, y));
            enemies.push(EnemySpawn {
                kind: HoldableKind::Bobomb,
                x: x + 0.25,
                y: (y + 1) as f32 * TILE_SIZE + 0.25,
            });
            TileCoord::new(start + len - 1, y + 1)
        },
        _ => {
            // Pit with bricks overhead
            let start = base_x + rng.random_range(2..4);
            let len = rng.random_range(2..4);
            for x in start..start + len {
                for y in ground_top - GROUND_ROWS..ground_top {
                    grid.set(TileCoord::new(x, y), None);
                }
                grid.set(TileCoord::new(x, ground_top + 4), Some(Tile::Brick));
            }
            TileCoord::new(start, ground_top + 5)
        },
    };
    let (x, y) = tile_to_world(top);
    (x + 0.25, y + 0.25)
}
