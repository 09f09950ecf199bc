//! Unified configuration for the medley engine.
//!
//! Configuration is loaded with precedence: Env vars > Config file > Defaults
//!
//! # Example config file (medley.toml)
//! ```toml
//! profile = "balanced"
//!
//! [build]
//! max_edit_distance = 1
//! workers = 8
//!
//! [query]
//! fanout_soft_limit = 10000
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SINGLE_WORKER_PAIR_THRESHOLD: usize = 1_000_000;
pub const DEFAULT_MAX_EDGE_TABLE_BYTES: usize = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_RECORD_BATCH_SIZE: usize = 1_024;
pub const DEFAULT_FANOUT_SOFT_LIMIT: usize = 10_000;
pub const DEFAULT_MATCH_CACHE_CAPACITY: usize = 100_000;

/// Main configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedleyConfig {
    /// Resource tuning profile
    pub profile: Profile,
    /// Index build tuning
    pub build: BuildTuning,
    /// Query tuning
    pub query: QueryTuning,
}

impl MedleyConfig {
    /// Load configuration with precedence: Env > File > Defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(MedleyConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("MEDLEY_").split("_"));

        let config: MedleyConfig = figment.extract().map_err(ConfigError::from)?;
        Ok(config.profile.apply(config))
    }

    /// Load from environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }
}

/// Resource tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Balanced settings for general workloads
    #[default]
    Balanced,
    /// Reduced memory footprint
    MemorySaver,
    /// Maximum throughput on large builds
    HighThroughput,
}

impl Profile {
    /// Overlay profile presets on an extracted configuration. Explicit
    /// file or env values for the same knobs win.
    fn apply(self, mut config: MedleyConfig) -> MedleyConfig {
        match self {
            Profile::Balanced => {}
            Profile::MemorySaver => {
                if config.build.max_edge_table_bytes == DEFAULT_MAX_EDGE_TABLE_BYTES {
                    config.build.max_edge_table_bytes = DEFAULT_MAX_EDGE_TABLE_BYTES / 8;
                }
                if config.query.match_cache_capacity == DEFAULT_MATCH_CACHE_CAPACITY {
                    config.query.match_cache_capacity = DEFAULT_MATCH_CACHE_CAPACITY / 10;
                }
            }
            Profile::HighThroughput => {
                if config.build.single_worker_pair_threshold
                    == DEFAULT_SINGLE_WORKER_PAIR_THRESHOLD
                {
                    config.build.single_worker_pair_threshold =
                        DEFAULT_SINGLE_WORKER_PAIR_THRESHOLD / 10;
                }
                if config.build.record_batch_size == DEFAULT_RECORD_BATCH_SIZE {
                    config.build.record_batch_size = DEFAULT_RECORD_BATCH_SIZE * 8;
                }
            }
        }
        config
    }
}

/// Index build tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildTuning {
    /// Group-deletion depth applied during fingerprinting; negative
    /// values clamp to zero
    pub max_edit_distance: i32,
    /// Below this many cluster edges, reduction runs on a single worker
    pub single_worker_pair_threshold: usize,
    /// Memory budget for the cluster edge table, in bytes
    pub max_edge_table_bytes: usize,
    /// Worker count for the data-parallel stages (0 = all cores)
    pub workers: usize,
    /// Records handed to a fingerprint worker per batch
    pub record_batch_size: usize,
}

impl Default for BuildTuning {
    fn default() -> Self {
        Self {
            max_edit_distance: 0,
            single_worker_pair_threshold: DEFAULT_SINGLE_WORKER_PAIR_THRESHOLD,
            max_edge_table_bytes: DEFAULT_MAX_EDGE_TABLE_BYTES,
            workers: 0,
            record_batch_size: DEFAULT_RECORD_BATCH_SIZE,
        }
    }
}

impl BuildTuning {
    /// Resolve the configured worker count against the host.
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Query tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryTuning {
    /// Per-key fanout above this logs a warning (results are never cut)
    pub fanout_soft_limit: usize,
    /// Entries in the match-id expansion cache
    pub match_cache_capacity: usize,
}

impl Default for QueryTuning {
    fn default() -> Self {
        Self {
            fanout_soft_limit: DEFAULT_FANOUT_SOFT_LIMIT,
            match_cache_capacity: DEFAULT_MATCH_CACHE_CAPACITY,
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
