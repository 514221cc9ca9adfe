use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, WorldConfig};
use crate::coords::Vec3;
use crate::entity::{EntityId, EntityIdAllocator, EntityManager, EntityRegistry, OwnerHandle};
use crate::nav::{JobId, PathOutcome, Pathfinder, PathfinderError};
use crate::physics::{CollisionResolver, ResolveReport};
use crate::world::{
    ChunkError, ChunkManager, ChunkStorage, DiskChunkStore, NoiseTerrain, PersistenceError,
    ReconcileReport, SaveMeta, SavePaths, TerrainGenerator, SAVE_FORMAT_VERSION,
};

const WORLD_OWNER: OwnerHandle = OwnerHandle(1);

#[derive(Debug, Error)]
pub enum WorldError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Pathfinder(#[from] PathfinderError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub reconcile: ReconcileReport,
    pub candidate_pairs: usize,
    pub collisions: ResolveReport,
    /// Entities that left the world this tick, by despawn or eviction.
    pub despawned: Vec<EntityId>,
    pub pending_paths: usize,
}

/// Owns every simulation subsystem and steps them in a fixed order:
/// chunk reconciliation, caller movement, collision resolution, deferred
/// spawns and despawns, then pathfinding.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    chunks: ChunkManager,
    entities: EntityManager,
    registry: EntityRegistry,
    resolver: CollisionResolver,
    pathfinder: Pathfinder,
    save_paths: Option<SavePaths>,
    viewpoint: Vec3,
    tick_count: u64,
}

impl World {
    pub fn new(
        config: WorldConfig,
        generator: Box<dyn TerrainGenerator>,
        store: Box<dyn ChunkStorage>,
        registry: EntityRegistry,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        Ok(Self {
            chunks: ChunkManager::new(config.chunk_size, config.load_radius, generator, store),
            entities: EntityManager::new(config.partition_size, WORLD_OWNER),
            registry,
            resolver: CollisionResolver::new(config.max_collision_passes),
            pathfinder: Pathfinder::new(config.validity_cache_capacity),
            save_paths: None,
            viewpoint: Vec3::ZERO,
            tick_count: 0,
            config,
        })
    }

    /// Opens the save at `paths`, creating it on first save. An existing save
    /// keeps its own seed and chunk size; the viewpoint and id allocator resume
    /// where they were.
    pub fn open(
        paths: SavePaths,
        mut config: WorldConfig,
        registry: EntityRegistry,
    ) -> Result<Self, WorldError> {
        let meta = SaveMeta::read(&paths)?;
        if let Some(meta) = &meta {
            if meta.seed != config.seed || meta.chunk_size != config.chunk_size {
                warn!(
                    saved_seed = meta.seed,
                    saved_chunk_size = meta.chunk_size,
                    config_seed = config.seed,
                    config_chunk_size = config.chunk_size,
                    "world_save_overrides_config"
                );
            }
            config.seed = meta.seed;
            config.chunk_size = meta.chunk_size;
        }

        let generator = NoiseTerrain::new(config.seed, config.terrain);
        let store = DiskChunkStore::new(paths.clone());
        let mut world = World::new(config, Box::new(generator), Box::new(store), registry)?;
        let resumed = meta.is_some();
        if let Some(meta) = meta {
            world.viewpoint = meta.viewpoint;
            world
                .entities
                .restore_allocator(EntityIdAllocator::starting_at(meta.next_entity_id));
        }
        info!(
            path = %paths.root().display(),
            resumed,
            "world_opened"
        );
        world.save_paths = Some(paths);
        Ok(world)
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut ChunkManager {
        &mut self.chunks
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    pub fn viewpoint(&self) -> Vec3 {
        self.viewpoint
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn save_paths(&self) -> Option<&SavePaths> {
        self.save_paths.as_ref()
    }

    /// Brings the chunk neighborhood around `viewpoint` in without advancing
    /// the simulation.
    pub fn warm_up(&mut self, viewpoint: Vec3) -> Result<ReconcileReport, WorldError> {
        self.viewpoint = viewpoint;
        Ok(self
            .chunks
            .reconcile(viewpoint, &mut self.entities, &self.registry)?)
    }

    pub fn tick(&mut self, viewpoint: Vec3, dt_seconds: f32) -> Result<TickReport, WorldError> {
        self.tick_with(viewpoint, dt_seconds, |_| {})
    }

    /// Runs one tick. `move_entities` is where callers move, spawn and despawn
    /// entities; positions it sets become this tick's velocities.
    pub fn tick_with(
        &mut self,
        viewpoint: Vec3,
        dt_seconds: f32,
        move_entities: impl FnOnce(&mut EntityManager),
    ) -> Result<TickReport, WorldError> {
        let started = Instant::now();
        let reconcile = self.warm_up(viewpoint)?;

        self.entities.begin_tick();
        move_entities(&mut self.entities);

        let pairs = match self.chunks.loaded_bounds() {
            Some(bounds) => self.entities.broad_phase_pairs(
                bounds.min_x as f32,
                (bounds.max_x + 1) as f32,
                bounds.min_y as f32,
                (bounds.max_y + 1) as f32,
            ),
            None => Vec::new(),
        };
        let collisions = self.resolver.resolve(&pairs, &mut self.entities, dt_seconds);
        self.entities.apply_pending();

        self.pathfinder
            .advance(self.config.path_cycles_per_tick, &self.chunks);

        self.tick_count += 1;
        let report = TickReport {
            tick: self.tick_count,
            reconcile,
            candidate_pairs: pairs.len(),
            collisions,
            despawned: self.entities.drain_despawned(),
            pending_paths: self.pathfinder.pending_count(),
        };
        debug!(
            tick = report.tick,
            elapsed_us = started.elapsed().as_micros() as u64,
            entities = self.entities.len(),
            pairs = report.candidate_pairs,
            collision_passes = report.collisions.passes,
            pending_paths = report.pending_paths,
            "world_tick_completed"
        );
        Ok(report)
    }

    pub fn submit_path(
        &mut self,
        start: Vec3,
        destination: Vec3,
    ) -> Result<(JobId, Vec3), WorldError> {
        Ok(self.pathfinder.submit_job(start, destination, &self.chunks)?)
    }

    pub fn collect_path(&mut self, id: JobId) -> Option<PathOutcome> {
        self.pathfinder.collect(id)
    }

    pub fn cancel_path(&mut self, id: JobId) -> bool {
        self.pathfinder.cancel(id)
    }

    /// Marks or clears an obstacle on the tile under `location`.
    pub fn set_obstacle(&mut self, location: Vec3, has_obstacle: bool) -> bool {
        self.chunks.set_obstacle(location, has_obstacle)
    }

    /// Writes every resident chunk, plus the stored chunk under any live
    /// entity that wandered outside them, and the save metadata. Worlds built
    /// with [`World::new`] only persist chunks to their store. Returns the
    /// number of chunks written.
    pub fn save(&mut self) -> Result<usize, WorldError> {
        let written = self.chunks.persist_resident(&mut self.entities)?;
        if let Some(paths) = &self.save_paths {
            SaveMeta {
                format_version: SAVE_FORMAT_VERSION,
                seed: self.config.seed,
                chunk_size: self.config.chunk_size,
                next_entity_id: self.entities.allocator().peek_next(),
                viewpoint: self.viewpoint,
            }
            .write(paths)?;
        }
        info!(chunks = written, tick = self.tick_count, "world_saved");
        Ok(written)
    }
}
