use std::fmt;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::tile::Tile;
use crate::config::TerrainConfig;
use crate::entity::{EntityDraft, Tree};

pub const DESERT_TILE_ID: u16 = 12;
const GRASS_WEIGHTS: [(u16, u32); 6] = [(0, 32), (1, 2), (2, 2), (3, 2), (4, 1), (5, 1)];
const TUNDRA_WEIGHTS: [(u16, u32); 6] = [(6, 64), (7, 2), (8, 2), (9, 2), (10, 1), (11, 1)];

const FOREST_DENSITY: f64 = 0.03;
const BIOME_PERIOD: f64 = 200.0;
const BIOME_BLEND_WIDTH: f64 = 0.02;
const WATER_EDGE_SOFTNESS: f64 = 0.5;
const DESERT_WATER_THRESHOLD: f64 = 0.84;
const GRASSLAND_WATER_THRESHOLD: f64 = 0.66;
const TUNDRA_WATER_THRESHOLD: f64 = 0.74;

const SALT_TILE: u64 = 1;
const SALT_WATER: u64 = 2;
const SALT_TREE: u64 = 3;

/// Produces the tile (and optionally an entity) at one world tile location.
/// Implementations must be pure: the same input always yields the same output.
pub trait TerrainGenerator: fmt::Debug {
    fn generate_tile(&self, x: i32, y: i32, is_border: bool) -> (Tile, Option<EntityDraft>);
}

/// Uniform, unobstructed ground. Handy for tests and tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlatTerrain {
    pub tile_id: u16,
}

impl TerrainGenerator for FlatTerrain {
    fn generate_tile(&self, x: i32, y: i32, is_border: bool) -> (Tile, Option<EntityDraft>) {
        (Tile::new(self.tile_id, x, y, is_border), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Biome {
    Desert,
    Grassland,
    Tundra,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BiomeWeights {
    desert: f64,
    grassland: f64,
    tundra: f64,
}

impl BiomeWeights {
    fn dominant(&self) -> Biome {
        if self.desert >= self.grassland && self.desert >= self.tundra {
            Biome::Desert
        } else if self.grassland >= self.tundra {
            Biome::Grassland
        } else {
            Biome::Tundra
        }
    }
}

/// Perlin terrain: a temperature-banded biome field, lakes whose threshold
/// blends across biomes, and sparse forests that mark their tile as blocked.
pub struct NoiseTerrain {
    seed: u32,
    config: TerrainConfig,
    biome: Fbm<Perlin>,
    lake: Fbm<Perlin>,
    forest: Fbm<Perlin>,
    desert_edge: f64,
    tundra_edge: f64,
}

impl fmt::Debug for NoiseTerrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseTerrain")
            .field("seed", &self.seed)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NoiseTerrain {
    pub fn new(seed: u32, config: TerrainConfig) -> Self {
        let temperature = config.temperature.signed();
        Self {
            seed,
            config,
            biome: Fbm::<Perlin>::new(seed)
                .set_octaves(3)
                .set_persistence(0.5)
                .set_lacunarity(1.5),
            lake: Fbm::<Perlin>::new(seed)
                .set_octaves(2)
                .set_persistence(0.65)
                .set_lacunarity(2.5),
            forest: Fbm::<Perlin>::new(seed)
                .set_octaves(2)
                .set_persistence(1.5)
                .set_lacunarity(1.5),
            desert_edge: -0.35 + temperature * 0.1,
            tundra_edge: 0.25 + temperature * 0.1,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn config(&self) -> TerrainConfig {
        self.config
    }

    fn biome_weights(&self, x: f64, y: f64) -> BiomeWeights {
        let value =
            self.biome.get([x / BIOME_PERIOD, y / BIOME_PERIOD]) + 0.4 * (y / BIOME_PERIOD).cos();
        let desert_to_grass = smoothstep(
            self.desert_edge - BIOME_BLEND_WIDTH,
            self.desert_edge + BIOME_BLEND_WIDTH,
            value,
        );
        let grass_to_tundra = smoothstep(
            self.tundra_edge - BIOME_BLEND_WIDTH,
            self.tundra_edge + BIOME_BLEND_WIDTH,
            value,
        );
        let desert = 1.0 - desert_to_grass;
        let tundra = grass_to_tundra;
        let grassland = desert_to_grass * (1.0 - grass_to_tundra);
        let sum = desert + grassland + tundra;
        if sum <= 1e-6 {
            return BiomeWeights {
                desert: 0.0,
                grassland: 1.0,
                tundra: 0.0,
            };
        }
        BiomeWeights {
            desert: desert / sum,
            grassland: grassland / sum,
            tundra: tundra / sum,
        }
    }

    fn water_tile_id(&self, x: i32, y: i32, weights: &BiomeWeights) -> Option<u16> {
        let scale = self.config.water_level.noise_scale();
        let lake = self.lake.get([x as f64 / scale, y as f64 / scale]) + 0.5;
        let threshold = weights.desert * DESERT_WATER_THRESHOLD
            + weights.grassland * GRASSLAND_WATER_THRESHOLD
            + weights.tundra * TUNDRA_WATER_THRESHOLD;
        let wetness = smoothstep(
            threshold - WATER_EDGE_SOFTNESS,
            threshold + WATER_EDGE_SOFTNESS,
            lake,
        );
        if wetness < 0.5 {
            return None;
        }
        let water = [
            (13, (weights.grassland * 1000.0).floor() as u32),
            (14, (weights.tundra * 1000.0).floor() as u32),
            (15, (weights.desert * 1000.0).floor() as u32),
        ];
        Some(pick_weighted(&water, self.roll(x, y, SALT_WATER)))
    }

    fn has_tree(&self, x: i32, y: i32) -> bool {
        let scale = self.config.forest_size.noise_scale();
        let density = self.forest.get([x as f64 / scale, y as f64 / scale]);
        density < 0.0 && self.roll(x, y, SALT_TREE) < FOREST_DENSITY
    }

    fn roll(&self, x: i32, y: i32, salt: u64) -> f64 {
        unit_roll(self.seed, x, y, salt)
    }
}

impl TerrainGenerator for NoiseTerrain {
    fn generate_tile(&self, x: i32, y: i32, is_border: bool) -> (Tile, Option<EntityDraft>) {
        let weights = self.biome_weights(x as f64, y as f64);
        if let Some(id) = self.water_tile_id(x, y, &weights) {
            return (Tile::new(id, x, y, is_border), None);
        }
        let biome = weights.dominant();
        let id = match biome {
            Biome::Desert => DESERT_TILE_ID,
            Biome::Grassland => pick_weighted(&GRASS_WEIGHTS, self.roll(x, y, SALT_TILE)),
            Biome::Tundra => pick_weighted(&TUNDRA_WEIGHTS, self.roll(x, y, SALT_TILE)),
        };
        let tile = Tile::new(id, x, y, is_border);
        if biome == Biome::Desert || !self.has_tree(x, y) {
            return (tile, None);
        }
        let tree = Tree {
            snowy: biome == Biome::Tundra,
        };
        (
            tile.with_obstacle(true),
            Some(EntityDraft::new(Tree::body_at_tile(x, y), tree)),
        )
    }
}

fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn pick_weighted(weights: &[(u16, u32)], roll: f64) -> u16 {
    let total: u64 = weights.iter().map(|(_, weight)| *weight as u64).sum();
    let Some(&(fallback, _)) = weights.first() else {
        return 0;
    };
    if total == 0 {
        return fallback;
    }
    let target = ((roll * total as f64) as u64).min(total - 1);
    let mut cumulative = 0u64;
    for (id, weight) in weights {
        cumulative += *weight as u64;
        if target < cumulative {
            return *id;
        }
    }
    fallback
}

/// Deterministic value in `[0, 1)` for one tile and purpose.
fn unit_roll(seed: u32, x: i32, y: i32, salt: u64) -> f64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    let words = [seed as u64, x as u32 as u64, y as u32 as u64, salt];
    for word in words {
        for byte in word.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    // Final avalanche so neighbouring tiles do not share high bits.
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    (hash >> 11) as f64 / (1u64 << 53) as f64
}
