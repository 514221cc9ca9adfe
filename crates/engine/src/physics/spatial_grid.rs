use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;

use crate::coords::Vec3;
use crate::entity::{Entity, EntityId};

use super::collision::min_corner;

pub type CellKey = (i32, i32);

/// Axis-aligned query rectangle in world units, `[x, x + width) x [y, y + height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl QueryRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
            || !self.x.is_finite()
            || !self.y.is_finite()
            || !self.width.is_finite()
            || !self.height.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeQuery<'a> {
    pub rect: QueryRect,
    pub exclude_kind: Option<&'a str>,
    /// Filter candidates by point location instead of returning everything in
    /// the candidate cells.
    pub strict: bool,
}

impl<'a> RangeQuery<'a> {
    pub fn strict(rect: QueryRect) -> Self {
        Self {
            rect,
            exclude_kind: None,
            strict: true,
        }
    }

    pub fn loose(rect: QueryRect) -> Self {
        Self {
            rect,
            exclude_kind: None,
            strict: false,
        }
    }

    pub fn excluding(mut self, classname: &'a str) -> Self {
        self.exclude_kind = Some(classname);
        self
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    keys: Vec<CellKey>,
    position: Vec3,
    anchor_offset: f32,
    classname: &'static str,
}

/// Uniform hash grid over entity footprints. Each tracked entity is listed in
/// the cell of every corner of its box, and the grid remembers which cells it
/// used so moves only rebucket when that set changes.
#[derive(Debug, Clone)]
pub struct SpatialHashGrid {
    partition_size: f32,
    cells: HashMap<CellKey, Vec<EntityId>>,
    tracked: HashMap<EntityId, Tracked>,
}

impl SpatialHashGrid {
    pub fn new(partition_size: f32) -> Self {
        debug_assert!(partition_size > 0.0, "partition size must be positive");
        Self {
            partition_size,
            cells: HashMap::new(),
            tracked: HashMap::new(),
        }
    }

    pub fn partition_size(&self) -> f32 {
        self.partition_size
    }

    pub fn cell_key(&self, x: f32, y: f32) -> CellKey {
        (
            (x / self.partition_size).floor() as i32,
            (y / self.partition_size).floor() as i32,
        )
    }

    /// Sorted, deduplicated cells touched by the four x/y corners of a box
    /// centered at `position`.
    pub fn keys_for(&self, position: Vec3, size: Vec3) -> Vec<CellKey> {
        let corner = min_corner(position, size);
        let far_x = corner.x + size.x;
        let far_y = corner.y + size.y;
        let mut keys = vec![
            self.cell_key(corner.x, corner.y),
            self.cell_key(far_x, corner.y),
            self.cell_key(corner.x, far_y),
            self.cell_key(far_x, far_y),
        ];
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.tracked.contains_key(&id)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, key: CellKey) -> &[EntityId] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cells currently holding `id`.
    pub fn keys_of(&self, id: EntityId) -> Option<&[CellKey]> {
        self.tracked.get(&id).map(|tracked| tracked.keys.as_slice())
    }

    /// Starts tracking `entity`. Returns false if it was already tracked.
    pub fn insert(&mut self, entity: &Entity) -> bool {
        let id = entity.id();
        if self.tracked.contains_key(&id) {
            return false;
        }
        let keys = self.keys_for(entity.body.position, entity.body.size);
        for key in &keys {
            self.cells.entry(*key).or_default().push(id);
        }
        self.tracked.insert(
            id,
            Tracked {
                keys,
                position: entity.body.position,
                anchor_offset: entity.kind().anchor_offset(),
                classname: entity.classname(),
            },
        );
        true
    }

    /// Stops tracking `id`. Returns false if it was not tracked.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(tracked) = self.tracked.remove(&id) else {
            return false;
        };
        for key in &tracked.keys {
            self.detach_from_cell(*key, id);
        }
        true
    }

    /// Records the entity's current position and rebuckets it if its corner
    /// cells changed. Returns true when cell membership changed.
    pub fn on_move(&mut self, entity: &Entity) -> bool {
        let id = entity.id();
        let keys = self.keys_for(entity.body.position, entity.body.size);
        let Some(tracked) = self.tracked.get_mut(&id) else {
            return false;
        };
        tracked.position = entity.body.position;
        if tracked.keys == keys {
            return false;
        }
        let stale = std::mem::replace(&mut tracked.keys, keys);
        let fresh = tracked.keys.clone();
        for key in stale.iter().filter(|key| !fresh.contains(key)) {
            self.detach_from_cell(*key, id);
        }
        for key in fresh.iter().filter(|key| !stale.contains(key)) {
            self.cells.entry(*key).or_default().push(id);
        }
        true
    }

    /// Candidate pairs for narrow-phase testing. Only entities sharing a cell
    /// are paired; an entity larger than a cell that straddles without a
    /// corner in a neighbour's cell is not reported against it.
    pub fn broad_phase_pairs(
        &self,
        min_x: f32,
        max_x: f32,
        min_y: f32,
        max_y: f32,
    ) -> Vec<(EntityId, EntityId)> {
        let (Some(xs), Some(ys)) = (
            self.padded_cells(min_x, max_x),
            self.padded_cells(min_y, max_y),
        ) else {
            return Vec::new();
        };
        let mut pairs = BTreeSet::new();
        for cx in xs {
            for cy in ys.clone() {
                let Some(members) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for (index, a) in members.iter().enumerate() {
                    for b in &members[index + 1..] {
                        pairs.insert(if a < b { (*a, *b) } else { (*b, *a) });
                    }
                }
            }
        }
        pairs.into_iter().collect()
    }

    pub fn range_query(&self, query: &RangeQuery<'_>) -> Vec<EntityId> {
        if query.rect.is_degenerate() {
            return Vec::new();
        }
        let rect = query.rect;
        let (Some(xs), Some(ys)) = (
            self.padded_cells(rect.x, rect.x + rect.width),
            self.padded_cells(rect.y, rect.y + rect.height),
        ) else {
            return Vec::new();
        };
        let mut found = BTreeSet::new();
        for cx in xs {
            for cy in ys.clone() {
                let Some(members) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for id in members {
                    let Some(tracked) = self.tracked.get(id) else {
                        continue;
                    };
                    if query.exclude_kind == Some(tracked.classname) {
                        continue;
                    }
                    if query.strict && !anchored_inside(tracked, &rect) {
                        continue;
                    }
                    found.insert(*id);
                }
            }
        }
        found.into_iter().collect()
    }

    /// Runs `query` and stops tracking everything it returned.
    pub fn remove_in_range(&mut self, query: &RangeQuery<'_>) -> Vec<EntityId> {
        let found = self.range_query(query);
        for id in &found {
            self.remove(*id);
        }
        found
    }

    fn detach_from_cell(&mut self, key: CellKey, id: EntityId) {
        let Some(members) = self.cells.get_mut(&key) else {
            return;
        };
        members.retain(|member| *member != id);
        if members.is_empty() {
            self.cells.remove(&key);
        }
    }

    /// Cell indices overlapping `[min, max]` widened by one cell each side.
    fn padded_cells(&self, min: f32, max: f32) -> Option<RangeInclusive<i32>> {
        if !(min <= max) || !min.is_finite() || !max.is_finite() {
            return None;
        }
        let low = (min / self.partition_size).floor() as i32;
        let high = (max / self.partition_size).floor() as i32;
        Some(low.saturating_sub(1)..=high.saturating_add(1))
    }
}

fn anchored_inside(tracked: &Tracked, rect: &QueryRect) -> bool {
    let offset = tracked.anchor_offset;
    let x = tracked.position.x;
    let y = tracked.position.y;
    rect.x - offset <= x
        && x < rect.x + rect.width - offset
        && rect.y - offset <= y
        && y < rect.y + rect.height - offset
}
