use serde::{Deserialize, Serialize};

use crate::coords::Vec3;

pub const WATER_TILE_IDS: [u16; 3] = [13, 14, 15];

/// One ground square. Everything but the obstacle flag is fixed at generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: u16,
    /// Integer corner of the tile; it covers `[x, x + 1) x [y, y + 1)`.
    pub location: Vec3,
    pub is_chunk_border: bool,
    pub is_water: bool,
    pub has_obstacle: bool,
}

impl Tile {
    pub fn new(id: u16, x: i32, y: i32, is_chunk_border: bool) -> Self {
        Self {
            id,
            location: Vec3::xy(x as f32, y as f32),
            is_chunk_border,
            is_water: WATER_TILE_IDS.contains(&id),
            has_obstacle: false,
        }
    }

    pub fn with_obstacle(mut self, has_obstacle: bool) -> Self {
        self.has_obstacle = has_obstacle;
        self
    }

    pub fn tile_location(&self) -> (i32, i32) {
        self.location.tile_location()
    }

    pub fn center(&self) -> Vec3 {
        self.location.tile_center()
    }

    /// Walkers may not enter water or obstacle tiles.
    pub fn is_blocked(&self) -> bool {
        self.has_obstacle || self.is_water
    }
}
