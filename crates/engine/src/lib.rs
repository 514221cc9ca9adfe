pub mod config;
pub mod coords;
pub mod entity;
pub mod nav;
pub mod physics;
pub mod sim;
pub mod world;

pub use config::{ConfigError, Degree, TerrainConfig, WorldConfig};
pub use coords::{load_radius_for_viewport, ChunkCoord, GridCoord, TileBounds, Vec3};
pub use entity::{
    Body, Contact, Critter, Entity, EntityCommands, EntityDraft, EntityId, EntityIdAllocator,
    EntityKind, EntityManager, EntityRecord, EntityRegistry, OwnerHandle, RegistryError, Tree,
};
pub use nav::{Direction, JobId, PathOutcome, PathSteps, Pathfinder, PathfinderError};
pub use physics::{CollisionResolver, QueryRect, RangeQuery, ResolveReport, SpatialHashGrid};
pub use sim::{TickReport, World, WorldError};
pub use world::{
    Chunk, ChunkError, ChunkManager, ChunkRecord, ChunkStorage, DiskChunkStore, FlatTerrain,
    MemoryChunkStore, NoiseTerrain, PersistenceError, ReconcileReport, SaveMeta, SavePaths,
    TerrainGenerator, Tile, TileLookup,
};
