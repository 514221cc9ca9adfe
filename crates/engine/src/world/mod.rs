mod chunk;
mod chunk_manager;
mod persistence;
mod terrain;
mod tile;

pub use chunk::{chunk_id, Chunk, ChunkRecord};
pub use chunk_manager::{ChunkError, ChunkManager, ReconcileReport};
pub use persistence::{
    ChunkStorage, DiskChunkStore, MemoryChunkStore, PersistenceError, SaveMeta, SavePaths,
    SAVE_FORMAT_VERSION,
};
pub use terrain::{FlatTerrain, NoiseTerrain, TerrainGenerator, DESERT_TILE_ID};
pub use tile::{Tile, WATER_TILE_IDS};

use crate::coords::{TileBounds, Vec3};

/// Read access to loaded terrain, as needed by the pathfinder.
pub trait TileLookup {
    fn tile_at(&self, location: Vec3) -> Option<&Tile>;

    /// Inclusive tile range currently loaded, `None` when nothing is.
    fn loaded_bounds(&self) -> Option<TileBounds>;

    /// Changes whenever any tile's walkability may have changed.
    fn generation(&self) -> u64;
}
