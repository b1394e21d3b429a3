//! Tile bump trigger: find everything standing on a hit tile and notify each
//! bumpable object once.

use starclash_core::replicated::EntityRef;
use starclash_core::tile::{InteractionDirection, TileCoord};

use crate::level::{TILE_SIZE, tile_to_world};

/// Maximum colliders collected by one bump query.
pub const BUMP_CAPACITY: usize = 32;
/// Offset of the query box center from the cell's bottom-left corner.
pub const BUMP_OFFSET: (f32, f32) = (TILE_SIZE / 2.0, TILE_SIZE);
/// Size of the query box, a thin strip along the top of the cell.
pub const BUMP_SIZE: (f32, f32) = (0.45, 0.1);

/// Bounded overlap query provided by the physics layer.
pub trait SpatialQuery {
    /// Write up to `capacity` colliders overlapping the box into `out` and
    /// return how many were written. Colliders past the capacity are dropped;
    /// which ones are kept must be deterministic.
    fn overlap_box(
        &self,
        center: (f32, f32),
        size: (f32, f32),
        capacity: usize,
        out: &mut Vec<EntityRef>,
    ) -> usize;
}

/// Objects that can react to being bumped from a tile.
pub trait BumpTarget {
    fn is_bumpable(&self, target: EntityRef) -> bool;

    fn block_bump(
        &mut self,
        target: EntityRef,
        interacter: EntityRef,
        tile: TileCoord,
        direction: InteractionDirection,
    );
}

/// Reusable bump query state.
#[derive(Debug)]
pub struct BumpTrigger {
    capacity: usize,
    hits: Vec<EntityRef>,
    notified: Vec<EntityRef>,
}

impl Default for BumpTrigger {
    fn default() -> Self {
        Self::with_capacity(BUMP_CAPACITY)
    }
}

impl BumpTrigger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            hits: Vec::with_capacity(capacity),
            notified: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Collect the objects sitting on `tile` and notify every bumpable one
    /// other than the interacter, once each. Returns the objects notified.
    pub fn trigger<W>(
        &mut self,
        world: &mut W,
        interacter: EntityRef,
        tile: TileCoord,
        direction: InteractionDirection,
    ) -> &[EntityRef]
    where
        W: SpatialQuery + BumpTarget,
    {
        self.hits.clear();
        self.notified.clear();

        let (wx, wy) = tile_to_world(tile);
        let center = (wx + BUMP_OFFSET.0, wy + BUMP_OFFSET.1);
        let found = world.overlap_box(center, BUMP_SIZE, self.capacity, &mut self.hits);
        // Never trust the collaborator to honor the bound.
        self.hits.truncate(found.min(self.capacity));

        for &target in &self.hits {
            if target == interacter || self.notified.contains(&target) {
                continue;
            }
            if !world.is_bumpable(target) {
                continue;
            }
            world.block_bump(target, interacter, tile, direction);
            self.notified.push(target);
        }
        tracing::trace!(
            x = tile.x,
            y = tile.y,
            found,
            notified = self.notified.len(),
            "Bump trigger"
        );
        &self.notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Aabb;

    /// A pile of colliders standing on one tile.
    struct Crowd {
        colliders: Vec<(EntityRef, Aabb)>,
        bumps: Vec<(EntityRef, EntityRef)>,
        solid_only: Vec<EntityRef>,
    }

    impl Crowd {
        fn on_tile(tile: TileCoord, n: u32) -> Self {
            let (wx, wy) = tile_to_world(tile);
            let colliders = (0..n)
                .map(|i| {
                    (
                        EntityRef::Holdable(i),
                        Aabb {
                            cx: wx + 0.25,
                            cy: wy + 0.7,
                            half_w: 0.2,
                            half_h: 0.2,
                        },
                    )
                })
                .collect();
            Self {
                colliders,
                bumps: Vec::new(),
                solid_only: Vec::new(),
            }
        }
    }

    impl SpatialQuery for Crowd {
        fn overlap_box(
            &self,
            center: (f32, f32),
            size: (f32, f32),
            capacity: usize,
            out: &mut Vec<EntityRef>,
        ) -> usize {
            let query = Aabb::from_center_size(center, size);
            out.clear();
            for (id, collider) in &self.colliders {
                if out.len() == capacity {
                    break;
                }
                if collider.overlaps(&query) {
                    out.push(*id);
                }
            }
            out.len()
        }
    }

    impl BumpTarget for Crowd {
        fn is_bumpable(&self, target: EntityRef) -> bool {
            !self.solid_only.contains(&target)
        }

        fn block_bump(
            &mut self,
            target: EntityRef,
            interacter: EntityRef,
            _tile: TileCoord,
            _direction: InteractionDirection,
        ) {
            self.bumps.push((target, interacter));
        }
    }

    #[test]
    fn overflow_is_bounded_and_interacter_skipped() {
        let tile = TileCoord::new(2, 1);
        let mut crowd = Crowd::on_tile(tile, 40);
        let interacter = EntityRef::Holdable(0);
        let mut trigger = BumpTrigger::default();

        let notified = trigger
            .trigger(&mut crowd, interacter, tile, InteractionDirection::Up)
            .to_vec();

        assert!(notified.len() <= BUMP_CAPACITY);
        assert_eq!(notified.len(), BUMP_CAPACITY - 1);
        assert!(!notified.contains(&interacter));
        assert_eq!(crowd.bumps.len(), notified.len());
        assert!(crowd.bumps.iter().all(|(target, by)| *target != interacter && *by == interacter));
    }

    #[test]
    fn duplicates_notified_once() {
        let tile = TileCoord::new(0, 0);
        let mut crowd = Crowd::on_tile(tile, 1);
        let dup = crowd.colliders[0];
        crowd.colliders.push(dup);
        let mut trigger = BumpTrigger::default();
        trigger.trigger(&mut crowd, EntityRef::Player(9), tile, InteractionDirection::Up);
        assert_eq!(crowd.bumps.len(), 1);
    }

    #[test]
    fn non_bumpable_colliders_are_skipped() {
        let tile = TileCoord::new(0, 0);
        let mut crowd = Crowd::on_tile(tile, 3);
        crowd.solid_only.push(EntityRef::Holdable(1));
        let mut trigger = BumpTrigger::default();
        let notified = trigger
            .trigger(&mut crowd, EntityRef::Player(9), tile, InteractionDirection::Up)
            .to_vec();
        assert_eq!(notified, vec![EntityRef::Holdable(0), EntityRef::Holdable(2)]);
    }

    #[test]
    fn colliders_above_other_tiles_are_not_hit() {
        let mut crowd = Crowd::on_tile(TileCoord::new(5, 0), 4);
        let mut trigger = BumpTrigger::default();
        let notified = trigger.trigger(
            &mut crowd,
            EntityRef::Player(9),
            TileCoord::new(0, 0),
            InteractionDirection::Up,
        );
        assert!(notified.is_empty());
    }
}
