use serde::Deserialize;

use starclash_core::room::MatchConfig;

/// Headless runner configuration, loaded from `config/sim.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Peers present from the start. Ids run from 1; the first is the authority.
    pub peers: usize,
    /// Stop after this many rounds even if the match has not ended.
    pub max_ticks: u64,
    /// Pace rounds at the match tick rate instead of running flat out.
    pub realtime: bool,
    pub seed: u64,
    /// Round at which one more peer joins.
    pub late_joiner_at_tick: Option<u64>,
    /// Round at which authority moves to the next member.
    pub authority_handover_tick: Option<u64>,
    /// Round at which the authority restores the original grid.
    pub reset_tiles_at_tick: Option<u64>,
    /// Chance per round that someone touches the star in play.
    pub star_collect_chance: f64,
    /// Chance per round and peer of hitting a random interactive tile.
    pub bump_chance: f64,
    /// Random star pickups and tile hits stop from this round on.
    pub quiet_after_tick: Option<u64>,
    #[serde(rename = "match")]
    pub match_config: MatchConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            max_ticks: 20_000,
            realtime: false,
            seed: 1,
            late_joiner_at_tick: Some(600),
            authority_handover_tick: None,
            reset_tiles_at_tick: Some(1_200),
            star_collect_chance: 0.05,
            bump_chance: 0.01,
            quiet_after_tick: None,
            match_config: MatchConfig {
                star_requirement: 3,
                ..MatchConfig::default()
            },
        }
    }
}

/// A config value the runner cannot work with.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoPeers,
    TooManyPeers { peers: usize, max_players: u8 },
    ZeroTickRate,
    ChanceOutOfRange { name: &'static str, value: f64 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPeers => write!(f, "peers must be > 0"),
            Self::TooManyPeers { peers, max_players } => {
                write!(f, "peers ({peers}) exceeds match.max_players ({max_players})")
            },
            Self::ZeroTickRate => write!(f, "match.tick_rate_hz must be > 0"),
            Self::ChanceOutOfRange { name, value } => {
                write!(f, "{name} ({value}) must be within 0.0..=1.0")
            },
        }
    }
}

impl std::error::Error for ConfigError {}

impl SimConfig {
    /// Check the config for values the runner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers == 0 {
            return Err(ConfigError::NoPeers);
        }
        if self.peers > usize::from(self.match_config.max_players) {
            return Err(ConfigError::TooManyPeers {
                peers: self.peers,
                max_players: self.match_config.max_players,
            });
        }
        if self.match_config.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        for (name, value) in [
            ("star_collect_chance", self.star_collect_chance),
            ("bump_chance", self.bump_chance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ChanceOutOfRange { name, value });
            }
        }
        Ok(())
    }

    /// Load config from `STARCLASH_SIM_CONFIG` (default `config/sim.toml`),
    /// then apply env var overrides.
    pub fn load() -> Self {
        let path = std::env::var("STARCLASH_SIM_CONFIG")
            .unwrap_or_else(|_| "config/sim.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<SimConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {path}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {path}: {e}, using defaults");
                    SimConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No {path} found, using defaults");
                SimConfig::default()
            },
        };

        if let Ok(val) = std::env::var("STARCLASH_SIM_PEERS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.peers = n;
        }
        if let Ok(val) = std::env::var("STARCLASH_SIM_SEED")
            && let Ok(n) = val.parse::<u64>()
        {
            config.seed = n;
        }
        if let Ok(val) = std::env::var("STARCLASH_SIM_REALTIME")
            && let Ok(b) = val.parse::<bool>()
        {
            config.realtime = b;
        }

        config
    }
}
