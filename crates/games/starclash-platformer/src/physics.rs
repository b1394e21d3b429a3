use serde::{Deserialize, Serialize};

use starclash_core::net::messages::Kinematics;
use starclash_core::tile::{InteractionDirection, Tile, TileCoord};

use crate::level::{TILE_SIZE, TileGrid};

/// Gravity acceleration (units/s^2, downward).
pub const GRAVITY: f32 = -20.0;
/// Fastest allowed fall speed.
pub const TERMINAL_VELOCITY: f32 = -12.0;
/// Physics substeps per tick.
pub const SUBSTEPS: u32 = 4;
/// Tolerance above a semisolid top for landing detection.
const SEMISOLID_LAND_TOLERANCE: f32 = 0.1;
/// Tolerance below a semisolid top for landing detection.
const SEMISOLID_SNAP_TOLERANCE: f32 = 0.05;
/// How far below the level a body may fall before it counts as lost.
const FALL_OUT_MARGIN: f32 = 1.0;

/// Configurable physics parameters, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: f32,
    pub terminal_velocity: f32,
    pub substeps: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            terminal_velocity: TERMINAL_VELOCITY,
            substeps: SUBSTEPS,
        }
    }
}

/// Axis-aligned box given by center and half extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub cx: f32,
    pub cy: f32,
    pub half_w: f32,
    pub half_h: f32,
}

impl Aabb {
    pub fn around(body: &Kinematics, half_w: f32, half_h: f32) -> Self {
        Self {
            cx: body.x,
            cy: body.y,
            half_w,
            half_h,
        }
    }

    /// Box from a center point and a full size.
    pub fn from_center_size(center: (f32, f32), size: (f32, f32)) -> Self {
        Self {
            cx: center.0,
            cy: center.1,
            half_w: size.0 / 2.0,
            half_h: size.1 / 2.0,
        }
    }

    pub fn left(&self) -> f32 {
        self.cx - self.half_w
    }

    pub fn right(&self) -> f32 {
        self.cx + self.half_w
    }

    pub fn bottom(&self) -> f32 {
        self.cy - self.half_h
    }

    pub fn top(&self) -> f32 {
        self.cy + self.half_h
    }

    /// True when the interiors intersect; touching edges do not count.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.left() < other.right()
            && self.right() > other.left()
            && self.bottom() < other.top()
            && self.top() > other.bottom()
    }
}

/// What a body ran into during one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionReport {
    pub grounded: bool,
    /// Solid tile hit while moving up.
    pub hit_ceiling: Option<TileCoord>,
    /// Solid tile hit while moving sideways, with the direction of travel.
    pub hit_wall: Option<(TileCoord, InteractionDirection)>,
    /// The body dropped below the level.
    pub fell_out: bool,
}

impl CollisionReport {
    fn merge(&mut self, other: CollisionReport) {
        self.grounded |= other.grounded;
        self.fell_out |= other.fell_out;
        if self.hit_ceiling.is_none() {
            self.hit_ceiling = other.hit_ceiling;
        }
        if self.hit_wall.is_none() {
            self.hit_wall = other.hit_wall;
        }
    }
}

/// Advance a free body by `dt` seconds: gravity, movement and tile collisions.
pub fn step_body(
    body: &mut Kinematics,
    half_w: f32,
    half_h: f32,
    grid: &TileGrid,
    config: &PhysicsConfig,
    dt: f32,
) -> CollisionReport {
    let mut report = CollisionReport::default();
    if !dt.is_finite() || dt <= 0.0 {
        return report;
    }
    let substeps = config.substeps.max(1);
    let sub_dt = dt / substeps as f32;
    for _ in 0..substeps {
        body.vy = (body.vy + config.gravity * sub_dt).max(config.terminal_velocity);
        body.x += body.vx * sub_dt;
        body.y += body.vy * sub_dt;
        report.merge(resolve_collisions(body, half_w, half_h, grid));
    }
    report
}

pub(crate) fn resolve_collisions(
    body: &mut Kinematics,
    half_w: f32,
    half_h: f32,
    grid: &TileGrid,
) -> CollisionReport {
    let mut report = CollisionReport::default();

    let min_tx = ((body.x - half_w) / TILE_SIZE).floor() as i32;
    let max_tx = ((body.x + half_w) / TILE_SIZE).ceil() as i32;
    let min_ty = ((body.y - half_h) / TILE_SIZE).floor() as i32;
    let max_ty = ((body.y + half_h) / TILE_SIZE).ceil() as i32;

    for ty in min_ty..max_ty {
        for tx in min_tx..max_tx {
            let coord = TileCoord::new(tx, ty);
            if !grid.is_solid(coord) {
                continue;
            }

            let tile_left = tx as f32 * TILE_SIZE;
            let tile_bottom = ty as f32 * TILE_SIZE;
            let tile_right = tile_left + TILE_SIZE;
            let tile_top = tile_bottom + TILE_SIZE;

            let b_left = body.x - half_w;
            let b_right = body.x + half_w;
            let b_bottom = body.y - half_h;
            let b_top = body.y + half_h;

            if b_right <= tile_left
                || b_left >= tile_right
                || b_top <= tile_bottom
                || b_bottom >= tile_top
            {
                continue;
            }

            // Resolve with minimum penetration
            let overlap_left = b_right - tile_left;
            let overlap_right = tile_right - b_left;
            let overlap_bottom = b_top - tile_bottom;
            let overlap_top = tile_top - b_bottom;

            let min_overlap = overlap_left
                .min(overlap_right)
                .min(overlap_bottom)
                .min(overlap_top);

            if min_overlap == overlap_bottom {
                body.y = tile_bottom - half_h;
                if body.vy > 0.0 {
                    body.vy = 0.0;
                    report.hit_ceiling.get_or_insert(coord);
                }
            } else if min_overlap == overlap_top {
                body.y = tile_top + half_h;
                if body.vy < 0.0 {
                    body.vy = 0.0;
                }
                report.grounded = true;
            } else if min_overlap == overlap_left {
                body.x = tile_left - half_w;
                body.vx = 0.0;
                report
                    .hit_wall
                    .get_or_insert((coord, InteractionDirection::Right));
            } else {
                body.x = tile_right + half_w;
                body.vx = 0.0;
                report
                    .hit_wall
                    .get_or_insert((coord, InteractionDirection::Left));
            }
        }
    }

    // Semisolids: only collide from above, so also look at the row just below
    for ty in (min_ty - 1)..max_ty {
        for tx in min_tx..max_tx {
            if grid.get(TileCoord::new(tx, ty)) != Some(Tile::Semisolid) {
                continue;
            }

            let tile_top = (ty as f32 + 1.0) * TILE_SIZE;
            let b_bottom = body.y - half_h;
            let tile_left = tx as f32 * TILE_SIZE;
            let tile_right = tile_left + TILE_SIZE;

            if body.vy <= 0.0
                && b_bottom >= tile_top - SEMISOLID_LAND_TOLERANCE
                && b_bottom <= tile_top + SEMISOLID_SNAP_TOLERANCE
                && body.x + half_w > tile_left
                && body.x - half_w < tile_right
            {
                body.y = tile_top + half_h;
                body.vy = 0.0;
                report.grounded = true;
            }
        }
    }

    let floor = grid.bounds().min_y as f32 * TILE_SIZE;
    if body.y < floor - FALL_OUT_MARGIN {
        report.fell_out = true;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelBounds;

    /// A 20x10 grid with a two-row floor at y = 0..2 and optional extras.
    fn floor_grid_with_extras(extras: &[(i32, i32, Tile)]) -> TileGrid {
        let bounds = LevelBounds {
            min_x: 0,
            min_y: 0,
            width: 20,
            height: 10,
        };
        let mut grid = TileGrid::empty(bounds).unwrap();
        for x in 0..20 {
            grid.set(TileCoord::new(x, 0), Some(Tile::Ground));
            grid.set(TileCoord::new(x, 1), Some(Tile::Ground));
        }
        for &(x, y, tile) in extras {
            grid.set(TileCoord::new(x, y), Some(tile));
        }
        TileGrid::from_cells(bounds, grid.cells().to_vec()).unwrap()
    }

    const HALF: f32 = 0.2;

    #[test]
    fn gravity_pulls_down() {
        let grid = floor_grid_with_extras(&[]);
        let mut body = Kinematics {
            x: 3.0,
            y: 4.0,
            ..Default::default()
        };
        step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 0.05);
        assert!(body.y < 4.0, "Gravity should pull the body down");
        assert!(body.vy < 0.0);
    }

    #[test]
    fn lands_on_floor() {
        let grid = floor_grid_with_extras(&[]);
        let mut body = Kinematics {
            x: 3.0,
            y: 3.0,
            ..Default::default()
        };
        let config = PhysicsConfig::default();
        let mut grounded = false;
        for _ in 0..120 {
            grounded = step_body(&mut body, HALF, HALF, &grid, &config, 1.0 / 60.0).grounded;
        }
        assert!(grounded, "Body should come to rest on the floor");
        assert!((body.y - (1.0 + HALF)).abs() < 1e-3, "y = {}", body.y);
    }

    #[test]
    fn terminal_velocity_caps_fall() {
        let grid = floor_grid_with_extras(&[]);
        let mut body = Kinematics {
            x: 3.0,
            y: 1000.0,
            ..Default::default()
        };
        for _ in 0..200 {
            step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 1.0 / 60.0);
        }
        assert!(body.vy >= TERMINAL_VELOCITY);
    }

    #[test]
    fn wall_hit_reports_tile_and_direction() {
        // Brick at column 8 on the floor row y = 2 (world x 4.0..4.5).
        let grid = floor_grid_with_extras(&[(8, 2, Tile::Brick)]);
        let mut body = Kinematics {
            x: 3.7,
            y: 1.0 + HALF,
            vx: 4.5,
            vy: 0.0,
        };
        let report = step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 0.1);
        assert_eq!(
            report.hit_wall,
            Some((TileCoord::new(8, 2), InteractionDirection::Right))
        );
        assert_eq!(body.vx, 0.0);
        assert!(body.x + HALF <= 4.0 + 1e-4);
    }

    #[test]
    fn head_hit_reports_ceiling() {
        let grid = floor_grid_with_extras(&[(6, 4, Tile::Question)]);
        // Below tile (6,4): world x 3.0..3.5, y 2.0..2.5
        let mut body = Kinematics {
            x: 3.25,
            y: 1.7,
            vx: 0.0,
            vy: 6.0,
        };
        let report = step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 0.1);
        assert_eq!(report.hit_ceiling, Some(TileCoord::new(6, 4)));
        assert!(body.vy <= 0.0);
    }

    #[test]
    fn hidden_blocks_are_passable() {
        let grid = floor_grid_with_extras(&[(6, 4, Tile::Hidden)]);
        let mut body = Kinematics {
            x: 3.25,
            y: 1.7,
            vx: 0.0,
            vy: 6.0,
        };
        let report = step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 0.1);
        assert_eq!(report.hit_ceiling, None);
    }

    #[test]
    fn semisolid_only_from_above() {
        let grid = floor_grid_with_extras(&[(6, 4, Tile::Semisolid)]);
        // Rising through from below is allowed.
        let mut rising = Kinematics {
            x: 3.25,
            y: 1.9,
            vx: 0.0,
            vy: 8.0,
        };
        step_body(&mut rising, HALF, HALF, &grid, &PhysicsConfig::default(), 0.1);
        assert!(rising.y > 2.0, "Should pass up through a semisolid");

        // Falling onto it lands.
        let mut falling = Kinematics {
            x: 3.25,
            y: 2.5 + HALF + 0.02,
            vx: 0.0,
            vy: -1.0,
        };
        let config = PhysicsConfig::default();
        let report = step_body(&mut falling, HALF, HALF, &grid, &config, 1.0 / 60.0);
        assert!(report.grounded);
        assert!((falling.y - (2.5 + HALF)).abs() < 1e-4);
    }

    #[test]
    fn falling_below_level_is_reported() {
        let bounds = LevelBounds {
            min_x: 0,
            min_y: 0,
            width: 4,
            height: 4,
        };
        let grid = TileGrid::empty(bounds).unwrap();
        let mut body = Kinematics {
            x: 1.0,
            y: -0.9,
            vx: 0.0,
            vy: -10.0,
        };
        let report = step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 0.1);
        assert!(report.fell_out);
    }

    #[test]
    fn aabb_overlap_excludes_touching() {
        let a = Aabb::from_center_size((0.0, 0.0), (1.0, 1.0));
        let b = Aabb::from_center_size((1.0, 0.0), (1.0, 1.0));
        let c = Aabb::from_center_size((0.9, 0.9), (1.0, 1.0));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    // ================================================================
    // Property-based tests (proptest)
    // ================================================================

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn body_never_ends_inside_floor(
                x in 3.5f32..6.5,
                y in 1.3f32..4.5,
                vx in -4.0f32..4.0,
                vy in -12.0f32..8.0,
            ) {
                let grid = floor_grid_with_extras(&[]);
                let mut body = Kinematics { x, y, vx, vy };
                for _ in 0..30 {
                    step_body(&mut body, HALF, HALF, &grid, &PhysicsConfig::default(), 1.0 / 60.0);
                }
                prop_assert!(
                    body.y - HALF >= 1.0 - 1e-3,
                    "Body bottom {} sank into the floor",
                    body.y - HALF
                );
            }
        }
    }
}
