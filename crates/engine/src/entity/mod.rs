mod kinds;
mod manager;
mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coords::Vec3;

pub use kinds::{Critter, Tree, CRITTER_CLASSNAME, TREE_CLASSNAME};
pub use manager::EntityManager;
pub use registry::{EntityLoader, EntityRecord, EntityRegistry, RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Monotonic id source. The next id is persisted with the world so ids stay
/// unique across save/load.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    /// Keeps the allocator ahead of an id that entered the world from storage.
    pub fn observe(&mut self, id: EntityId) {
        if id.0 >= self.next {
            self.next = id.0.saturating_add(1);
        }
    }

    pub fn peek_next(&self) -> u64 {
        self.next
    }
}

/// Identifies the manager that currently owns an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(pub u32);

/// Physical state shared by every entity kind. `position` is the center of the
/// footprint on x/y and the ground contact on z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub prev_position: Vec3,
    pub size: Vec3,
    pub solid: bool,
}

impl Body {
    pub fn new(position: Vec3, size: Vec3, solid: bool) -> Self {
        Self {
            position,
            prev_position: position,
            size,
            solid,
        }
    }

    pub fn velocity(&self) -> Vec3 {
        self.position - self.prev_position
    }
}

/// What an entity is told when the resolver finds it overlapping another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub own_velocity: Vec3,
    pub other: EntityId,
    pub other_classname: &'static str,
    pub other_solid: bool,
    pub other_velocity: Vec3,
    pub substep_seconds: f32,
    /// Share of the tick this sub-step represents (1 / max passes).
    pub step_fraction: f32,
}

/// Behaviour and persisted state specific to one kind of entity.
pub trait EntityKind: fmt::Debug {
    /// Registry discriminator written to chunk files.
    fn classname(&self) -> &'static str;

    /// Transient kinds are dropped instead of being written into an evicted chunk.
    fn persistent(&self) -> bool {
        true
    }

    /// Kinds whose point location is deliberately offset from the tile they
    /// stand on report that offset here; strict range queries shift their
    /// rectangle by it.
    fn anchor_offset(&self) -> f32 {
        0.0
    }

    fn on_collision(&mut self, body: &mut Body, contact: &Contact, commands: &mut EntityCommands) {
        let _ = (body, contact, commands);
    }

    /// Kind-specific fields for the chunk file.
    fn save_fields(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// A not-yet-identified entity: terrain generation and collision callbacks
/// produce these and the manager assigns the id.
#[derive(Debug)]
pub struct EntityDraft {
    pub body: Body,
    pub kind: Box<dyn EntityKind>,
}

impl EntityDraft {
    pub fn new(body: Body, kind: impl EntityKind + 'static) -> Self {
        Self {
            body,
            kind: Box::new(kind),
        }
    }
}

#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    pub body: Body,
    owner: Option<OwnerHandle>,
    kind: Box<dyn EntityKind>,
}

impl Entity {
    pub fn new(id: EntityId, body: Body, kind: Box<dyn EntityKind>) -> Self {
        Self {
            id,
            body,
            owner: None,
            kind,
        }
    }

    pub fn from_draft(id: EntityId, draft: EntityDraft) -> Self {
        Self::new(id, draft.body, draft.kind)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn classname(&self) -> &'static str {
        self.kind.classname()
    }

    pub fn kind(&self) -> &dyn EntityKind {
        self.kind.as_ref()
    }

    pub fn kind_mut(&mut self) -> &mut dyn EntityKind {
        self.kind.as_mut()
    }

    pub fn owner(&self) -> Option<OwnerHandle> {
        self.owner
    }

    pub(crate) fn bind_owner(&mut self, owner: OwnerHandle) {
        debug_assert!(
            self.owner.is_none(),
            "entity {:?} is already owned by {:?}",
            self.id,
            self.owner
        );
        self.owner = Some(owner);
    }

    pub(crate) fn unbind_owner(&mut self) {
        self.owner = None;
    }

    pub(crate) fn respond_to_contact(&mut self, contact: &Contact, commands: &mut EntityCommands) {
        self.kind.on_collision(&mut self.body, contact, commands);
    }

    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            classname: self.classname().to_string(),
            id: self.id,
            location: self.body.position,
            prev_location: self.body.prev_position,
            size: self.body.size,
            solid: self.body.solid,
            fields: self.kind.save_fields(),
        }
    }
}

/// Spawns and despawns requested while the world is being iterated. Applied
/// by [`EntityManager::apply_pending`] once the pass is over.
#[derive(Debug, Default)]
pub struct EntityCommands {
    spawns: Vec<EntityDraft>,
    despawns: Vec<EntityId>,
}

impl EntityCommands {
    pub fn spawn(&mut self, draft: EntityDraft) {
        self.spawns.push(draft);
    }

    pub fn despawn(&mut self, id: EntityId) {
        self.despawns.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.despawns.is_empty()
    }
}
