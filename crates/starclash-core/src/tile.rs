use serde::{Deserialize, Serialize};

/// Tile kinds that can occupy a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tile {
    Ground,
    Brick,
    Question,
    /// Invisible block that only reveals itself when bumped from below.
    Hidden,
    /// A question or hidden block that has already been emptied.
    Used,
    Pipe,
    /// Platform that can be stood on but passed through from below.
    Semisolid,
}

impl Tile {
    /// Blocks movement from every side.
    pub fn is_solid(self) -> bool {
        !matches!(self, Tile::Semisolid | Tile::Hidden)
    }

    /// Reacts to being hit (bumped or broken).
    pub fn is_interactive(self) -> bool {
        matches!(self, Tile::Brick | Tile::Question | Tile::Hidden)
    }
}

/// Integer cell coordinate in tile space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Side of a tile that was hit, named by the direction the hitter moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionDirection {
    /// Hit from below.
    Up,
    /// Hit from above (ground pound).
    Down,
    Left,
    Right,
}

impl InteractionDirection {
    pub fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }
}

/// Things a bumped block can release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnResult {
    #[default]
    None,
    Coin,
    Mushroom,
    FireFlower,
    Star1Up,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solidity() {
        assert!(Tile::Ground.is_solid());
        assert!(Tile::Used.is_solid());
        assert!(!Tile::Semisolid.is_solid());
        assert!(!Tile::Hidden.is_solid());
    }

    #[test]
    fn interactivity() {
        for tile in [Tile::Brick, Tile::Question, Tile::Hidden] {
            assert!(tile.is_interactive(), "{tile:?} should be interactive");
        }
        for tile in [Tile::Ground, Tile::Used, Tile::Pipe, Tile::Semisolid] {
            assert!(!tile.is_interactive(), "{tile:?} should not be interactive");
        }
    }
}
