use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{
    Contact, Entity, EntityCommands, EntityDraft, EntityId, EntityIdAllocator, EntityRecord,
    OwnerHandle,
};
use crate::coords::Vec3;
use crate::physics::{QueryRect, RangeQuery, SpatialHashGrid};

/// Owns every live entity and keeps the spatial grid in step with them.
/// Solid entities are tracked by the grid; non-solid ones live only in the
/// entity map.
#[derive(Debug)]
pub struct EntityManager {
    handle: OwnerHandle,
    allocator: EntityIdAllocator,
    entities: BTreeMap<EntityId, Entity>,
    grid: SpatialHashGrid,
    commands: EntityCommands,
    pending_spawns: Vec<(EntityId, EntityDraft)>,
    pending_despawns: Vec<EntityId>,
    despawned: Vec<EntityId>,
}

impl EntityManager {
    pub fn new(partition_size: f32, handle: OwnerHandle) -> Self {
        Self {
            handle,
            allocator: EntityIdAllocator::default(),
            entities: BTreeMap::new(),
            grid: SpatialHashGrid::new(partition_size),
            commands: EntityCommands::default(),
            pending_spawns: Vec::new(),
            pending_despawns: Vec::new(),
            despawned: Vec::new(),
        }
    }

    pub fn handle(&self) -> OwnerHandle {
        self.handle
    }

    pub fn allocator(&self) -> &EntityIdAllocator {
        &self.allocator
    }

    pub fn restore_allocator(&mut self, allocator: EntityIdAllocator) {
        self.allocator = allocator;
        for id in self.entities.keys() {
            self.allocator.observe(*id);
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn grid(&self) -> &SpatialHashGrid {
        &self.grid
    }

    /// Adds `draft` immediately. Prefer [`EntityManager::queue_spawn`] while a
    /// pass over the entities is in progress.
    pub fn spawn(&mut self, draft: EntityDraft) -> EntityId {
        let id = self.allocator.allocate();
        self.adopt(Entity::from_draft(id, draft));
        id
    }

    /// Reserves an id now; the entity appears at the next
    /// [`EntityManager::apply_pending`].
    pub fn queue_spawn(&mut self, draft: EntityDraft) -> EntityId {
        let id = self.allocator.allocate();
        self.pending_spawns.push((id, draft));
        id
    }

    /// Reserves an id for an entity written straight to storage without
    /// going live.
    pub(crate) fn allocate_id(&mut self) -> EntityId {
        self.allocator.allocate()
    }

    pub fn queue_despawn(&mut self, id: EntityId) -> bool {
        let pending_spawn = self
            .pending_spawns
            .iter()
            .any(|(pending_id, _)| *pending_id == id);
        if !self.entities.contains_key(&id) && !pending_spawn {
            return false;
        }
        self.pending_despawns.push(id);
        true
    }

    /// Applies everything queued since the last call, collision callbacks
    /// included: despawns first, then spawns.
    pub fn apply_pending(&mut self) {
        let commands = std::mem::take(&mut self.commands);
        for draft in commands.spawns {
            let id = self.allocator.allocate();
            self.pending_spawns.push((id, draft));
        }
        self.pending_despawns.extend(commands.despawns);
        if self.pending_spawns.is_empty() && self.pending_despawns.is_empty() {
            return;
        }

        let mut despawns = std::mem::take(&mut self.pending_despawns);
        despawns.sort_unstable();
        despawns.dedup();
        let mut removed = 0usize;
        for id in &despawns {
            if self.despawn(*id).is_some() {
                removed += 1;
            }
        }

        let mut spawned = 0usize;
        for (id, draft) in std::mem::take(&mut self.pending_spawns) {
            if despawns.binary_search(&id).is_ok() {
                continue;
            }
            self.adopt(Entity::from_draft(id, draft));
            spawned += 1;
        }
        debug!(
            spawned,
            removed,
            live = self.entities.len(),
            "entity_pending_applied"
        );
    }

    /// Takes ownership of an entity that already has an id, e.g. one restored
    /// from a chunk file.
    pub fn adopt(&mut self, mut entity: Entity) {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            warn!(entity_id = id.0, "entity_adopt_duplicate_id");
            return;
        }
        self.allocator.observe(id);
        entity.bind_owner(self.handle);
        if entity.body.solid {
            self.grid.insert(&entity);
        }
        self.entities.insert(id, entity);
    }

    /// Destroys an entity now and records it for despawn listeners.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.detach(id)?;
        self.despawned.push(id);
        Some(entity)
    }

    /// Removes an entity without announcing a despawn; used when it moves
    /// into chunk storage.
    pub fn detach(&mut self, id: EntityId) -> Option<Entity> {
        let mut entity = self.entities.remove(&id)?;
        self.grid.remove(id);
        entity.unbind_owner();
        Some(entity)
    }

    pub(crate) fn note_despawned(&mut self, id: EntityId) {
        self.despawned.push(id);
    }

    /// Ids destroyed since the last call.
    pub fn drain_despawned(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.despawned)
    }

    pub fn set_position(&mut self, id: EntityId, position: Vec3) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        entity.body.position = position;
        self.grid.on_move(entity);
        true
    }

    pub fn move_entity(&mut self, id: EntityId, delta: Vec3) -> bool {
        let Some(position) = self.entities.get(&id).map(|entity| entity.body.position) else {
            return false;
        };
        self.set_position(id, position + delta)
    }

    /// Starts a movement phase: velocity becomes the displacement applied
    /// from here until the next call.
    pub fn begin_tick(&mut self) {
        for entity in self.entities.values_mut() {
            entity.body.prev_position = entity.body.position;
        }
    }

    pub(crate) fn respond_to_contact(&mut self, id: EntityId, contact: &Contact) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let before = entity.body.position;
        entity.respond_to_contact(contact, &mut self.commands);
        if entity.body.position != before {
            self.grid.on_move(entity);
        }
    }

    pub fn broad_phase_pairs(
        &self,
        min_x: f32,
        max_x: f32,
        min_y: f32,
        max_y: f32,
    ) -> Vec<(EntityId, EntityId)> {
        self.grid.broad_phase_pairs(min_x, max_x, min_y, max_y)
    }

    /// Entities whose location lies in the chunk square with minimum corner
    /// `origin`, solid and non-solid alike.
    pub fn entities_in_chunk_rect(
        &self,
        origin: Vec3,
        chunk_size: u32,
        exclude_kind: Option<&str>,
    ) -> Vec<EntityId> {
        let rect = chunk_rect(origin, chunk_size);
        let mut query = RangeQuery::strict(rect);
        query.exclude_kind = exclude_kind;
        let mut found = self.grid.range_query(&query);
        found.extend(self.unsolid_in_rect(&rect, exclude_kind));
        found.sort_unstable();
        found
    }

    /// Removes every entity located in the chunk square from the live set
    /// without announcing despawns.
    pub fn detach_chunk_entities(
        &mut self,
        origin: Vec3,
        chunk_size: u32,
        exclude_kind: Option<&str>,
    ) -> Vec<Entity> {
        let rect = chunk_rect(origin, chunk_size);
        let mut query = RangeQuery::strict(rect);
        query.exclude_kind = exclude_kind;
        let mut ids = self.grid.remove_in_range(&query);
        ids.extend(self.unsolid_in_rect(&rect, exclude_kind));
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.detach(id)).collect()
    }

    /// Records of the persistent entities in a chunk square, leaving them live.
    pub fn records_in_chunk_rect(&self, origin: Vec3, chunk_size: u32) -> Vec<EntityRecord> {
        self.entities_in_chunk_rect(origin, chunk_size, None)
            .into_iter()
            .filter_map(|id| self.entities.get(&id))
            .filter(|entity| entity.kind().persistent())
            .map(Entity::to_record)
            .collect()
    }

    /// Entities within `radius` of `center` (2D distance) accepted by `filter`.
    pub fn entities_in_radius(
        &self,
        center: Vec3,
        radius: f32,
        filter: impl Fn(&Entity) -> bool,
    ) -> Vec<EntityId> {
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let rect = QueryRect::new(center.x - radius, center.y - radius, 2.0 * radius, 2.0 * radius);
        let mut found: Vec<EntityId> = self
            .grid
            .range_query(&RangeQuery::loose(rect))
            .into_iter()
            .chain(
                self.entities
                    .values()
                    .filter(|entity| !entity.body.solid)
                    .map(Entity::id),
            )
            .filter_map(|id| self.entities.get(&id))
            .filter(|entity| entity.body.position.euclidean_2d(center) <= radius)
            .filter(|entity| filter(entity))
            .map(Entity::id)
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    fn unsolid_in_rect(&self, rect: &QueryRect, exclude_kind: Option<&str>) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|entity| !entity.body.solid)
            .filter(|entity| exclude_kind != Some(entity.classname()))
            .filter(|entity| {
                let offset = entity.kind().anchor_offset();
                let p = entity.body.position;
                rect.x - offset <= p.x
                    && p.x < rect.x + rect.width - offset
                    && rect.y - offset <= p.y
                    && p.y < rect.y + rect.height - offset
            })
            .map(Entity::id)
            .collect()
    }
}

fn chunk_rect(origin: Vec3, chunk_size: u32) -> QueryRect {
    let size = chunk_size as f32;
    QueryRect::new(origin.x, origin.y, size, size)
}
