use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CHUNK_SIZE: u32 = 64;
pub const DEFAULT_PARTITION_SIZE: f32 = 8.0;
pub const DEFAULT_MAX_COLLISION_PASSES: u32 = 5;
pub const DEFAULT_PATH_CYCLES_PER_TICK: u32 = 128;
pub const DEFAULT_VALIDITY_CACHE_CAPACITY: usize = 16_384;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degree {
    Low,
    #[default]
    Medium,
    High,
}

impl Degree {
    /// Noise period modifier used by terrain features scaled by this degree.
    pub fn noise_scale(self) -> f64 {
        match self {
            Degree::Low => 50.0,
            Degree::Medium => 100.0,
            Degree::High => 200.0,
        }
    }

    pub fn signed(self) -> f64 {
        match self {
            Degree::Low => -1.0,
            Degree::Medium => 0.0,
            Degree::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub water_level: Degree,
    pub forest_size: Degree,
    pub temperature: Degree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Tiles per chunk edge.
    pub chunk_size: u32,
    /// Chunks kept resident on each side of the viewpoint chunk.
    pub load_radius: u32,
    /// Spatial hash cell edge, in world units.
    pub partition_size: f32,
    pub max_collision_passes: u32,
    pub path_cycles_per_tick: u32,
    pub validity_cache_capacity: usize,
    pub seed: u32,
    pub terrain: TerrainConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            load_radius: 1,
            partition_size: DEFAULT_PARTITION_SIZE,
            max_collision_passes: DEFAULT_MAX_COLLISION_PASSES,
            path_cycles_per_tick: DEFAULT_PATH_CYCLES_PER_TICK,
            validity_cache_capacity: DEFAULT_VALIDITY_CACHE_CAPACITY,
            seed: 1,
            terrain: TerrainConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,
    #[error("partition_size must be a positive finite number, got {value}")]
    InvalidPartitionSize { value: f32 },
    #[error("max_collision_passes must be at least 1")]
    ZeroCollisionPasses,
    #[error("path_cycles_per_tick must be at least 1")]
    ZeroPathCycles,
    #[error("validity_cache_capacity must be at least 1")]
    ZeroCacheCapacity,
}

impl WorldConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if !self.partition_size.is_finite() || self.partition_size <= 0.0 {
            return Err(ConfigError::InvalidPartitionSize {
                value: self.partition_size,
            });
        }
        if self.max_collision_passes == 0 {
            return Err(ConfigError::ZeroCollisionPasses);
        }
        if self.path_cycles_per_tick == 0 {
            return Err(ConfigError::ZeroPathCycles);
        }
        if self.validity_cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    pub fn resident_chunk_count(&self) -> usize {
        let side = 2 * self.load_radius as usize + 1;
        side * side
    }
}
