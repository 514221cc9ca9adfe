use serde::{Deserialize, Serialize};

use super::persistence::PersistenceError;
use super::terrain::TerrainGenerator;
use super::tile::Tile;
use crate::coords::{ChunkCoord, Vec3};
use crate::entity::{Entity, EntityDraft, EntityRecord, EntityRegistry};

/// A chunk as written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u64,
    pub size: u32,
    pub location: Vec3,
    pub tiles: Vec<Tile>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
}

/// Square block of `size * size` tiles.
///
/// Tiles are stored row by row along local x. Within a row the first tile is
/// at the chunk's highest y and y falls as the index grows, so local tile
/// `(lx, ly)` lives at `lx * size + (size - 1 - ly)`.
///
/// While a chunk is resident its entities belong to the entity manager and
/// `entities` is empty; the list only holds entities on their way to or from
/// storage.
#[derive(Debug)]
pub struct Chunk {
    id: u64,
    coord: ChunkCoord,
    size: u32,
    tiles: Vec<Tile>,
    entities: Vec<Entity>,
}

impl Chunk {
    /// Builds the chunk's tiles from `generator`, returning the entities it
    /// placed alongside.
    pub fn generate(
        coord: ChunkCoord,
        size: u32,
        generator: &dyn TerrainGenerator,
    ) -> (Self, Vec<EntityDraft>) {
        let origin_x = coord.x * size as i32;
        let origin_y = coord.y * size as i32;
        let last = size as i32 - 1;
        let mut tiles = Vec::with_capacity((size * size) as usize);
        let mut drafts = Vec::new();
        for lx in 0..=last {
            for ly in (0..=last).rev() {
                let is_border = lx == 0 || lx == last || ly == 0 || ly == last;
                let (tile, draft) =
                    generator.generate_tile(origin_x + lx, origin_y + ly, is_border);
                tiles.push(tile);
                drafts.extend(draft);
            }
        }
        let chunk = Self {
            id: chunk_id(coord),
            coord,
            size,
            tiles,
            entities: Vec::new(),
        };
        (chunk, drafts)
    }

    pub fn from_record(
        coord: ChunkCoord,
        record: ChunkRecord,
        registry: &EntityRegistry,
    ) -> Result<Self, PersistenceError> {
        let expected = (record.size as usize) * (record.size as usize);
        if record.tiles.len() != expected {
            return Err(PersistenceError::TileCount {
                coord,
                expected,
                actual: record.tiles.len(),
            });
        }
        let entities = record
            .entities
            .iter()
            .map(|entity| registry.load(entity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: record.id,
            coord,
            size: record.size,
            tiles: record.tiles,
            entities,
        })
    }

    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            id: self.id,
            size: self.size,
            location: self.origin(),
            tiles: self.tiles.clone(),
            entities: self.entities.iter().map(Entity::to_record).collect(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn origin(&self) -> Vec3 {
        self.coord.origin(self.size)
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub(crate) fn set_entities(&mut self, entities: Vec<Entity>) {
        self.entities = entities;
    }

    pub(crate) fn take_entities(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.entities)
    }

    pub fn contains(&self, location: Vec3) -> bool {
        self.local_index(location).is_some()
    }

    pub fn tile_at(&self, location: Vec3) -> Option<&Tile> {
        let index = self.local_index(location)?;
        self.tiles.get(index)
    }

    pub fn tile_at_mut(&mut self, location: Vec3) -> Option<&mut Tile> {
        let index = self.local_index(location)?;
        self.tiles.get_mut(index)
    }

    /// Tiles whose integer location lies in `[x0, x1) x [y0, y1)`.
    pub fn tiles_in_rect(&self, x0: f32, x1: f32, y0: f32, y1: f32) -> Vec<&Tile> {
        if !(x0 < x1 && y0 < y1) {
            return Vec::new();
        }
        let size = self.size as i64;
        let (ox, oy) = (self.coord.x as i64 * size, self.coord.y as i64 * size);
        let (x0, x1) = (x0 as f64, x1 as f64);
        let (y0, y1) = (y0 as f64, y1 as f64);
        let (min_x, max_x) = (ox as f64, (ox + size) as f64);
        let (min_y, max_y) = (oy as f64, (oy + size) as f64);

        if x1 <= min_x || x0 >= max_x || y1 <= min_y || y0 >= max_y {
            return Vec::new();
        }
        if x0 <= min_x && x1 >= max_x && y0 <= min_y && y1 >= max_y {
            return self.tiles.iter().collect();
        }

        // First local index whose tile location is >= the bound. Clamped
        // before the cast so infinite bounds stay in range.
        let local = |bound: f64, origin: i64| {
            (bound.ceil() - origin as f64).clamp(0.0, size as f64) as i64
        };
        let (lx_lo, lx_hi) = (local(x0, ox), local(x1, ox));
        let (ly_lo, ly_hi) = (local(y0, oy), local(y1, oy));
        let mut tiles = Vec::with_capacity(((lx_hi - lx_lo) * (ly_hi - ly_lo)).max(0) as usize);
        for lx in lx_lo..lx_hi {
            let row = (lx * size) as usize;
            let start = row + (size - ly_hi) as usize;
            let end = row + (size - ly_lo) as usize;
            tiles.extend(self.tiles[start..end].iter());
        }
        tiles
    }

    fn local_index(&self, location: Vec3) -> Option<usize> {
        if !location.is_finite() {
            return None;
        }
        let size = self.size as i64;
        let (tx, ty) = location.tile_location();
        let lx = tx as i64 - self.coord.x as i64 * size;
        let ly = ty as i64 - self.coord.y as i64 * size;
        if !(0..size).contains(&lx) || !(0..size).contains(&ly) {
            return None;
        }
        Some((lx * size + (size - 1 - ly)) as usize)
    }
}

/// Stable id derived from the chunk coordinate.
pub fn chunk_id(coord: ChunkCoord) -> u64 {
    ((coord.x as u32 as u64) << 32) | coord.y as u32 as u64
}
