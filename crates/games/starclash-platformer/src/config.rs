use serde::{Deserialize, Serialize};

use crate::holdable::HoldableConfig;
use crate::physics::PhysicsConfig;
use crate::stars::StarConfig;
use crate::tiles::TileConfig;

/// Data-driven configuration for the platformer simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformerConfig {
    /// Seed for level generation. Every participant must use the same one.
    pub level_seed: u64,
    pub physics: PhysicsConfig,
    pub holdable: HoldableConfig,
    pub tiles: TileConfig,
    pub stars: StarConfig,
}

impl Default for PlatformerConfig {
    fn default() -> Self {
        Self {
            level_seed: 42,
            physics: PhysicsConfig::default(),
            holdable: HoldableConfig::default(),
            tiles: TileConfig::default(),
            stars: StarConfig::default(),
        }
    }
}

impl PlatformerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file is missing
    /// or unparseable.
    pub fn load() -> Self {
        let path = std::env::var("STARCLASH_PLATFORMER_CONFIG")
            .unwrap_or_else(|_| "config/platformer.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {path}: {e}, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PlatformerConfig::from_toml(
            r#"
level_seed = 7

[holdable]
throw_speed = 6.0

[stars]
respawn_secs = 3.0
"#,
        )
        .unwrap();
        assert_eq!(config.level_seed, 7);
        assert_eq!(config.holdable.throw_speed, 6.0);
        assert_eq!(config.holdable.place_speed, 2.0);
        assert_eq!(config.stars.respawn_secs, 3.0);
        assert_eq!(config.physics, PhysicsConfig::default());
    }

    #[test]
    fn spawn_results_parse_by_name() {
        let config = PlatformerConfig::from_toml(
            r#"
[tiles]
question_spawn = "Mushroom"
"#,
        )
        .unwrap();
        assert_eq!(
            config.tiles.question_spawn,
            starclash_core::tile::SpawnResult::Mushroom
        );
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(PlatformerConfig::from_toml("level_seed = \"nope\"").is_err());
    }
}
