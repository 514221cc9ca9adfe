use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::chunk::Chunk;
use super::persistence::{ChunkStorage, PersistenceError};
use super::terrain::TerrainGenerator;
use super::tile::Tile;
use super::TileLookup;
use crate::coords::{ChunkCoord, TileBounds, Vec3};
use crate::entity::{Entity, EntityId, EntityManager, EntityRecord, EntityRegistry};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("failed to load chunk ({}, {})", coord.x, coord.y)]
    Load {
        coord: ChunkCoord,
        #[source]
        source: PersistenceError,
    },
    #[error("failed to save chunk ({}, {})", coord.x, coord.y)]
    Save {
        coord: ChunkCoord,
        #[source]
        source: PersistenceError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub center: Option<ChunkCoord>,
    /// False when the viewpoint stayed in the same chunk and nothing was done.
    pub changed: bool,
    pub retained: usize,
    pub loaded: Vec<ChunkCoord>,
    pub generated: Vec<ChunkCoord>,
    pub evicted: Vec<ChunkCoord>,
    /// Entities that became live from loaded or generated chunks.
    pub entities_in: usize,
    /// Entities written into evicted chunks.
    pub entities_out: usize,
    /// Transient entities dropped with their chunk.
    pub entities_dropped: usize,
}

/// Keeps the square neighborhood of chunks around the viewpoint resident.
///
/// Chunks leaving the neighborhood take the entities standing in them to
/// storage; chunks entering it come back from storage or are generated, and
/// their entities go live in the entity manager.
#[derive(Debug)]
pub struct ChunkManager {
    chunk_size: u32,
    load_radius: u32,
    generator: Box<dyn TerrainGenerator>,
    store: Box<dyn ChunkStorage>,
    resident: BTreeMap<ChunkCoord, Chunk>,
    center: Option<ChunkCoord>,
    generation: u64,
}

impl ChunkManager {
    pub fn new(
        chunk_size: u32,
        load_radius: u32,
        generator: Box<dyn TerrainGenerator>,
        store: Box<dyn ChunkStorage>,
    ) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            chunk_size,
            load_radius,
            generator,
            store,
            resident: BTreeMap::new(),
            center: None,
            generation: 0,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn load_radius(&self) -> u32 {
        self.load_radius
    }

    pub fn center(&self) -> Option<ChunkCoord> {
        self.center
    }

    /// Bumped whenever the resident set or an obstacle changes, including by
    /// a reconcile that failed partway.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store(&self) -> &dyn ChunkStorage {
        self.store.as_ref()
    }

    pub fn resident_coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.resident.keys().copied()
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.resident.get(&coord)
    }

    pub fn reconcile(
        &mut self,
        viewpoint: Vec3,
        entities: &mut EntityManager,
        registry: &EntityRegistry,
    ) -> Result<ReconcileReport, ChunkError> {
        let center = viewpoint.chunk_coord(self.chunk_size);
        if self.center == Some(center) {
            return Ok(ReconcileReport {
                center: Some(center),
                retained: self.resident.len(),
                ..ReconcileReport::default()
            });
        }

        let mut report = ReconcileReport {
            center: Some(center),
            changed: true,
            ..ReconcileReport::default()
        };

        let wanted = center.neighborhood(self.load_radius);
        let swapped = self.swap_neighborhood(wanted, entities, registry, &mut report);
        let resident_changed =
            !(report.evicted.is_empty() && report.loaded.is_empty() && report.generated.is_empty());
        if swapped.is_ok() || resident_changed {
            self.generation = self.generation.wrapping_add(1);
        }
        if let Err(error) = swapped {
            warn!(
                center_x = center.x,
                center_y = center.y,
                evicted = report.evicted.len(),
                loaded = report.loaded.len() + report.generated.len(),
                error = %error,
                "chunk_neighborhood_reconcile_failed"
            );
            return Err(error);
        }

        self.center = Some(center);
        info!(
            center_x = center.x,
            center_y = center.y,
            retained = report.retained,
            loaded = report.loaded.len(),
            generated = report.generated.len(),
            evicted = report.evicted.len(),
            entities_in = report.entities_in,
            entities_out = report.entities_out,
            "chunk_neighborhood_reconciled"
        );
        Ok(report)
    }

    /// Evicts resident chunks outside `wanted`, then loads or generates the
    /// missing ones. Stops at the first failure, leaving whatever was
    /// already swapped recorded in `report`.
    fn swap_neighborhood(
        &mut self,
        wanted: Vec<ChunkCoord>,
        entities: &mut EntityManager,
        registry: &EntityRegistry,
        report: &mut ReconcileReport,
    ) -> Result<(), ChunkError> {
        let wanted_set: BTreeSet<ChunkCoord> = wanted.iter().copied().collect();
        let stale: Vec<ChunkCoord> = self
            .resident
            .keys()
            .filter(|coord| !wanted_set.contains(coord))
            .copied()
            .collect();
        for coord in stale {
            let (written, dropped) = self.evict(coord, entities)?;
            report.evicted.push(coord);
            report.entities_out += written;
            report.entities_dropped += dropped;
        }

        for coord in wanted {
            if self.resident.contains_key(&coord) {
                report.retained += 1;
                continue;
            }
            let loaded = self
                .store
                .load(coord)
                .map_err(|source| ChunkError::Load { coord, source })?;
            let chunk = match loaded {
                Some(record) => {
                    let mut chunk = Chunk::from_record(coord, record, registry)
                        .map_err(|source| ChunkError::Load { coord, source })?;
                    let restored = chunk.take_entities();
                    report.entities_in += restored.len();
                    for entity in restored {
                        entities.adopt(entity);
                    }
                    debug!(chunk_x = coord.x, chunk_y = coord.y, "chunk_loaded");
                    report.loaded.push(coord);
                    chunk
                }
                None => {
                    let (chunk, drafts) =
                        Chunk::generate(coord, self.chunk_size, self.generator.as_ref());
                    report.entities_in += drafts.len();
                    for draft in drafts {
                        entities.spawn(draft);
                    }
                    debug!(chunk_x = coord.x, chunk_y = coord.y, "chunk_generated");
                    report.generated.push(coord);
                    chunk
                }
            };
            self.resident.insert(coord, chunk);
        }
        Ok(())
    }

    /// Moves the entities standing in `coord` into the chunk and writes it out.
    /// On a failed write the chunk and its entities are put back.
    fn evict(
        &mut self,
        coord: ChunkCoord,
        entities: &mut EntityManager,
    ) -> Result<(usize, usize), ChunkError> {
        let Some(mut chunk) = self.resident.remove(&coord) else {
            return Ok((0, 0));
        };
        let (persistent, transient): (Vec<_>, Vec<_>) = entities
            .detach_chunk_entities(chunk.origin(), self.chunk_size, None)
            .into_iter()
            .partition(|entity| entity.kind().persistent());
        let written = persistent.len();
        chunk.set_entities(persistent);

        if let Err(source) = self.store.save(coord, &chunk.to_record()) {
            warn!(chunk_x = coord.x, chunk_y = coord.y, error = %source, "chunk_evict_save_failed");
            for entity in chunk.take_entities().into_iter().chain(transient) {
                entities.adopt(entity);
            }
            self.resident.insert(coord, chunk);
            return Err(ChunkError::Save { coord, source });
        }

        let dropped = transient.len();
        for entity in transient {
            entities.note_despawned(entity.id());
        }
        debug!(
            chunk_x = coord.x,
            chunk_y = coord.y,
            entities = written,
            dropped,
            "chunk_evicted"
        );
        Ok((written, dropped))
    }

    /// Writes every resident chunk with a snapshot of its live entities,
    /// leaving everything resident. Persistent entities standing outside the
    /// resident chunks are added to the stored chunk under them, which is
    /// generated first if it was never saved. Returns the number of chunks
    /// written.
    pub fn persist_resident(&mut self, entities: &mut EntityManager) -> Result<usize, ChunkError> {
        let mut written = 0usize;
        let mut covered = BTreeSet::new();
        for (coord, chunk) in &self.resident {
            let mut record = chunk.to_record();
            record.entities = entities.records_in_chunk_rect(chunk.origin(), self.chunk_size);
            covered.extend(record.entities.iter().map(|entity| entity.id));
            self.store
                .save(*coord, &record)
                .map_err(|source| ChunkError::Save {
                    coord: *coord,
                    source,
                })?;
            written += 1;
        }

        let strays = self.stray_records(entities, &covered);
        let stray_count: usize = strays.values().map(Vec::len).sum();
        for (coord, records) in strays {
            self.persist_strays(coord, records, entities)?;
            written += 1;
        }
        info!(chunks = written, strays = stray_count, "chunk_resident_persisted");
        Ok(written)
    }

    /// Persistent live entities outside `covered`, keyed by the chunk that
    /// holds their anchored location.
    fn stray_records(
        &self,
        entities: &EntityManager,
        covered: &BTreeSet<EntityId>,
    ) -> BTreeMap<ChunkCoord, Vec<EntityRecord>> {
        let mut strays: BTreeMap<ChunkCoord, Vec<EntityRecord>> = BTreeMap::new();
        for entity in entities.iter() {
            if covered.contains(&entity.id()) || !entity.kind().persistent() {
                continue;
            }
            let offset = entity.kind().anchor_offset();
            let anchor = entity.body.position + Vec3::xy(offset, offset);
            if !anchor.is_finite() {
                warn!(entity_id = entity.id().0, "entity_save_skipped_non_finite");
                continue;
            }
            strays
                .entry(anchor.chunk_coord(self.chunk_size))
                .or_default()
                .push(entity.to_record());
        }
        strays
    }

    fn persist_strays(
        &mut self,
        coord: ChunkCoord,
        records: Vec<EntityRecord>,
        entities: &mut EntityManager,
    ) -> Result<(), ChunkError> {
        let stored = self
            .store
            .load(coord)
            .map_err(|source| ChunkError::Load { coord, source })?;
        let mut record = match stored {
            Some(record) => record,
            None => {
                let (chunk, drafts) =
                    Chunk::generate(coord, self.chunk_size, self.generator.as_ref());
                let mut record = chunk.to_record();
                record.entities = drafts
                    .into_iter()
                    .map(|draft| Entity::from_draft(entities.allocate_id(), draft).to_record())
                    .collect();
                record
            }
        };
        record
            .entities
            .retain(|stored| records.iter().all(|live| live.id != stored.id));
        let count = records.len();
        record.entities.extend(records);
        self.store
            .save(coord, &record)
            .map_err(|source| ChunkError::Save { coord, source })?;
        debug!(
            chunk_x = coord.x,
            chunk_y = coord.y,
            entities = count,
            "chunk_strays_persisted"
        );
        Ok(())
    }

    pub fn tile_at(&self, location: Vec3) -> Option<&Tile> {
        if !location.is_finite() {
            return None;
        }
        self.resident
            .get(&location.chunk_coord(self.chunk_size))?
            .tile_at(location)
    }

    /// Sets the obstacle flag of the tile under `location`. Returns false when
    /// no resident tile is there.
    pub fn set_obstacle(&mut self, location: Vec3, has_obstacle: bool) -> bool {
        if !location.is_finite() {
            return false;
        }
        let Some(tile) = self
            .resident
            .get_mut(&location.chunk_coord(self.chunk_size))
            .and_then(|chunk| chunk.tile_at_mut(location))
        else {
            return false;
        };
        if tile.has_obstacle != has_obstacle {
            tile.has_obstacle = has_obstacle;
            self.generation = self.generation.wrapping_add(1);
        }
        true
    }

    /// Resident tiles whose location lies in `[x0, x1) x [y0, y1)`, chunk by
    /// chunk in coordinate order.
    pub fn tiles_in_rect(&self, x0: f32, x1: f32, y0: f32, y1: f32) -> Vec<&Tile> {
        let mut tiles = Vec::new();
        for chunk in self.resident.values() {
            tiles.extend(chunk.tiles_in_rect(x0, x1, y0, y1));
        }
        tiles
    }

    /// Inclusive tile range covered by the resident chunks.
    pub fn loaded_bounds(&self) -> Option<TileBounds> {
        let first = self.resident.keys().next()?;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for coord in self.resident.keys() {
            min_x = min_x.min(coord.x);
            max_x = max_x.max(coord.x);
            min_y = min_y.min(coord.y);
            max_y = max_y.max(coord.y);
        }
        let size = self.chunk_size as i32;
        Some(TileBounds {
            min_x: min_x * size,
            max_x: (max_x + 1) * size - 1,
            min_y: min_y * size,
            max_y: (max_y + 1) * size - 1,
        })
    }
}

impl TileLookup for ChunkManager {
    fn tile_at(&self, location: Vec3) -> Option<&Tile> {
        ChunkManager::tile_at(self, location)
    }

    fn loaded_bounds(&self) -> Option<TileBounds> {
        ChunkManager::loaded_bounds(self)
    }

    fn generation(&self) -> u64 {
        ChunkManager::generation(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Critter, EntityDraft, EntityId, OwnerHandle, Tree, TREE_CLASSNAME};
    use crate::nav::{PathOutcome, Pathfinder};
    use crate::world::chunk::ChunkRecord;
    use crate::world::persistence::MemoryChunkStore;
    use crate::world::terrain::FlatTerrain;
    use std::io;
    use std::path::PathBuf;

    const SIZE: u32 = 4;

    fn manager() -> ChunkManager {
        ChunkManager::new(
            SIZE,
            1,
            Box::new(FlatTerrain::default()),
            Box::new(MemoryChunkStore::new()),
        )
    }

    fn entities() -> EntityManager {
        EntityManager::new(2.0, OwnerHandle(0))
    }

    /// Generates a single tree on tile (1, 1) of every chunk.
    #[derive(Debug)]
    struct OneTreePerChunk;

    impl TerrainGenerator for OneTreePerChunk {
        fn generate_tile(&self, x: i32, y: i32, is_border: bool) -> (Tile, Option<EntityDraft>) {
            let tile = Tile::new(0, x, y, is_border);
            if x.rem_euclid(SIZE as i32) == 1 && y.rem_euclid(SIZE as i32) == 1 {
                let draft = EntityDraft::new(Tree::body_at_tile(x, y), Tree::default());
                return (tile.with_obstacle(true), Some(draft));
            }
            (tile, None)
        }
    }

    #[derive(Debug, Default)]
    struct ReadOnlyStore;

    impl ChunkStorage for ReadOnlyStore {
        fn contains(&self, _coord: ChunkCoord) -> bool {
            false
        }

        fn load(&self, _coord: ChunkCoord) -> Result<Option<ChunkRecord>, PersistenceError> {
            Ok(None)
        }

        fn save(
            &mut self,
            _coord: ChunkCoord,
            _record: &ChunkRecord,
        ) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io {
                path: PathBuf::from("read-only"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only store"),
            })
        }
    }

    /// Memory store whose writes fail for one chunk.
    #[derive(Debug)]
    struct FailingStore {
        inner: MemoryChunkStore,
        broken: ChunkCoord,
    }

    impl ChunkStorage for FailingStore {
        fn contains(&self, coord: ChunkCoord) -> bool {
            self.inner.contains(coord)
        }

        fn load(&self, coord: ChunkCoord) -> Result<Option<ChunkRecord>, PersistenceError> {
            self.inner.load(coord)
        }

        fn save(
            &mut self,
            coord: ChunkCoord,
            record: &ChunkRecord,
        ) -> Result<(), PersistenceError> {
            if coord == self.broken {
                return Err(PersistenceError::Io {
                    path: PathBuf::from("broken"),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.inner.save(coord, record)
        }
    }

    fn run_path(
        pathfinder: &mut Pathfinder,
        chunks: &ChunkManager,
        start: Vec3,
        end: Vec3,
    ) -> PathOutcome {
        let (id, _) = pathfinder.submit_job(start, end, chunks).expect("submit");
        for _ in 0..1_000 {
            if let Some(outcome) = pathfinder.collect(id) {
                return outcome;
            }
            pathfinder.advance(256, chunks);
        }
        panic!("path job never finished");
    }

    #[test]
    fn first_reconcile_generates_full_neighborhood() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();

        let report = chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        assert!(report.changed);
        assert_eq!(report.generated.len(), 9);
        assert_eq!(chunks.resident_count(), 9);
        assert_eq!(chunks.generation(), 1);
        assert_eq!(
            chunks.loaded_bounds(),
            Some(TileBounds {
                min_x: -4,
                max_x: 7,
                min_y: -4,
                max_y: 7
            })
        );

        let again = chunks
            .reconcile(Vec3::xy(3.9, 0.1), &mut entities, &registry)
            .expect("reconcile");
        assert!(!again.changed);
        assert_eq!(again.retained, 9);
        assert_eq!(chunks.generation(), 1);
    }

    #[test]
    fn crossing_a_boundary_swaps_one_column() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");

        let report = chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        assert_eq!(report.retained, 6);
        assert_eq!(
            report.evicted,
            vec![
                ChunkCoord::new(-1, -1),
                ChunkCoord::new(-1, 0),
                ChunkCoord::new(-1, 1)
            ]
        );
        assert_eq!(report.generated.len(), 3);
        assert!(chunks.store().contains(ChunkCoord::new(-1, 0)));
        assert!(chunks.chunk(ChunkCoord::new(2, 0)).is_some());
        assert!(chunks.chunk(ChunkCoord::new(-1, 0)).is_none());
        assert_eq!(chunks.generation(), 2);
    }

    #[test]
    fn evicted_entities_round_trip_through_storage() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        let critter = entities.spawn(EntityDraft::new(
            Critter::body_at(Vec3::xy(-2.5, 1.5)),
            Critter { bumps: 4 },
        ));

        let out = chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect("move east");
        assert_eq!(out.entities_out, 1);
        assert!(!entities.contains(critter));
        assert!(!entities.grid().contains(critter));
        assert!(entities.drain_despawned().is_empty());
        let stored = chunks
            .store()
            .load(ChunkCoord::new(-1, 0))
            .expect("load")
            .expect("stored chunk");
        assert_eq!(stored.entities.len(), 1);
        assert_eq!(stored.entities[0].id, critter);

        let back = chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("move back");
        assert_eq!(back.loaded.len(), 3);
        assert_eq!(back.entities_in, 1);
        let restored = entities.get(critter).expect("critter live again");
        assert_eq!(restored.owner(), Some(OwnerHandle(0)));
        assert_eq!(restored.to_record().fields, serde_json::json!({ "bumps": 4 }));
        assert!(entities.grid().contains(critter));
        assert!(entities.allocator().peek_next() > critter.0);
    }

    #[test]
    fn generated_trees_go_live_and_are_stored_on_eviction() {
        let mut chunks = ChunkManager::new(
            SIZE,
            1,
            Box::new(OneTreePerChunk),
            Box::new(MemoryChunkStore::new()),
        );
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        assert_eq!(entities.len(), 9);
        assert!(chunks.tile_at(Vec3::xy(1.5, 1.5)).expect("tile").has_obstacle);

        chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect("move east");
        assert_eq!(entities.len(), 9);
        let stored = chunks
            .store()
            .load(ChunkCoord::new(-1, 1))
            .expect("load")
            .expect("stored chunk");
        assert_eq!(stored.entities.len(), 1);
        assert_eq!(stored.entities[0].classname, TREE_CLASSNAME);
    }

    #[test]
    fn failed_eviction_keeps_chunk_and_entities() {
        let mut chunks = ChunkManager::new(
            SIZE,
            1,
            Box::new(FlatTerrain::default()),
            Box::new(ReadOnlyStore),
        );
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        let critter = entities.spawn(EntityDraft::new(
            Critter::body_at(Vec3::xy(-2.5, -2.5)),
            Critter::default(),
        ));

        let error = chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect_err("save fails");
        assert!(matches!(
            error,
            ChunkError::Save { coord, .. } if coord == ChunkCoord::new(-1, -1)
        ));
        assert!(chunks.chunk(ChunkCoord::new(-1, -1)).is_some());
        assert!(entities.contains(critter));
        assert!(entities.grid().contains(critter));
        assert_eq!(chunks.center(), Some(ChunkCoord::new(0, 0)));
        assert_eq!(chunks.generation(), 1, "nothing was swapped");
    }

    #[test]
    fn partial_reconcile_still_invalidates_cached_walkability() {
        let mut chunks = ChunkManager::new(
            SIZE,
            1,
            Box::new(FlatTerrain::default()),
            Box::new(FailingStore {
                inner: MemoryChunkStore::new(),
                broken: ChunkCoord::new(-1, 0),
            }),
        );
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");

        let mut pathfinder = Pathfinder::new(4096);
        let (start, end) = (Vec3::xy(-3.5, -3.5), Vec3::xy(0.5, 0.5));
        assert!(run_path(&mut pathfinder, &chunks, start, end).is_found());
        assert!(pathfinder.cached_cells() > 0);
        let before = chunks.generation();

        let error = chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect_err("second eviction fails");
        assert!(matches!(
            error,
            ChunkError::Save { coord, .. } if coord == ChunkCoord::new(-1, 0)
        ));
        assert!(chunks.chunk(ChunkCoord::new(-1, -1)).is_none());
        assert!(chunks.chunk(ChunkCoord::new(-1, 0)).is_some());
        assert_eq!(chunks.center(), Some(ChunkCoord::new(0, 0)));
        assert!(chunks.generation() > before);
        assert!(chunks.tile_at(start).is_none());

        assert_eq!(
            run_path(&mut pathfinder, &chunks, start, end),
            PathOutcome::Unreachable
        );
    }

    #[test]
    fn tile_queries_cover_resident_chunks() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        assert!(chunks.tile_at(Vec3::xy(0.5, 0.5)).is_none());
        assert_eq!(chunks.loaded_bounds(), None);
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");

        let tile = chunks.tile_at(Vec3::xy(-3.2, 7.9)).expect("resident");
        assert_eq!(tile.tile_location(), (-4, 7));
        assert!(chunks.tile_at(Vec3::xy(8.0, 0.0)).is_none());
        assert!(chunks.tile_at(Vec3::xy(f32::INFINITY, 0.0)).is_none());

        let across = chunks.tiles_in_rect(3.0, 5.0, 0.0, 1.0);
        let locations: Vec<(i32, i32)> = across.iter().map(|tile| tile.tile_location()).collect();
        assert_eq!(locations, vec![(3, 0), (4, 0)]);
        assert_eq!(chunks.tiles_in_rect(-100.0, 100.0, -100.0, 100.0).len(), 144);
    }

    #[test]
    fn obstacle_changes_bump_generation() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        let before = chunks.generation();

        assert!(chunks.set_obstacle(Vec3::xy(2.5, 2.5), true));
        assert!(chunks.tile_at(Vec3::xy(2.5, 2.5)).expect("tile").is_blocked());
        assert_eq!(chunks.generation(), before + 1);
        assert!(chunks.set_obstacle(Vec3::xy(2.5, 2.5), true));
        assert_eq!(chunks.generation(), before + 1);
        assert!(!chunks.set_obstacle(Vec3::xy(50.0, 2.5), true));
    }

    #[test]
    fn persist_resident_snapshots_live_entities() {
        let mut chunks = manager();
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        let critter = entities.spawn(EntityDraft::new(
            Critter::body_at(Vec3::xy(1.5, 1.5)),
            Critter::default(),
        ));

        assert_eq!(chunks.persist_resident(&mut entities).expect("persist"), 9);
        assert!(entities.contains(critter));
        let stored = chunks
            .store()
            .load(ChunkCoord::new(0, 0))
            .expect("load")
            .expect("stored");
        let ids: Vec<EntityId> = stored.entities.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![critter]);
    }

    #[test]
    fn persist_resident_routes_strays_to_their_chunk() {
        let mut chunks = ChunkManager::new(
            SIZE,
            1,
            Box::new(OneTreePerChunk),
            Box::new(MemoryChunkStore::new()),
        );
        let mut entities = entities();
        let registry = EntityRegistry::with_builtin_kinds();
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("reconcile");
        chunks
            .reconcile(Vec3::xy(5.0, 1.0), &mut entities, &registry)
            .expect("move east");
        chunks
            .reconcile(Vec3::xy(1.0, 1.0), &mut entities, &registry)
            .expect("move back");
        assert!(chunks.store().contains(ChunkCoord::new(2, 0)));
        assert!(chunks.chunk(ChunkCoord::new(2, 0)).is_none());

        let near = entities.spawn(EntityDraft::new(
            Critter::body_at(Vec3::xy(9.5, 2.5)),
            Critter { bumps: 1 },
        ));
        let far = entities.spawn(EntityDraft::new(
            Critter::body_at(Vec3::xy(21.5, 1.5)),
            Critter { bumps: 2 },
        ));

        assert_eq!(chunks.persist_resident(&mut entities).expect("persist"), 11);
        assert!(entities.contains(near));
        assert!(entities.contains(far));

        let stored = chunks
            .store()
            .load(ChunkCoord::new(2, 0))
            .expect("load")
            .expect("stored");
        let ids: Vec<EntityId> = stored.entities.iter().map(|record| record.id).collect();
        assert_eq!(ids.len(), 2, "stored tree plus the stray: {ids:?}");
        assert!(ids.contains(&near));

        let generated = chunks
            .store()
            .load(ChunkCoord::new(5, 0))
            .expect("load")
            .expect("generated for the stray");
        assert_eq!(generated.tiles.len(), (SIZE * SIZE) as usize);
        let classnames: Vec<&str> = generated
            .entities
            .iter()
            .map(|record| record.classname.as_str())
            .collect();
        assert_eq!(classnames, vec![TREE_CLASSNAME, "critter"]);
        assert_eq!(generated.entities[1].id, far);
        assert!(entities.allocator().peek_next() > generated.entities[0].id.0);
    }
}
