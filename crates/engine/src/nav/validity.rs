use std::collections::{HashMap, VecDeque};

use crate::coords::GridCoord;
use crate::world::TileLookup;

/// Bounded memo of per-cell walkability. Oldest entries are evicted first, and
/// the whole cache is dropped whenever the terrain generation moves on.
#[derive(Debug)]
pub(crate) struct ValidityCache {
    capacity: usize,
    generation: Option<u64>,
    entries: HashMap<GridCoord, bool>,
    order: VecDeque<GridCoord>,
}

impl ValidityCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            generation: None,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn sync(&mut self, generation: u64) {
        if self.generation != Some(generation) {
            self.clear();
            self.generation = Some(generation);
        }
    }

    pub(crate) fn is_walkable(&mut self, coord: GridCoord, map: &dyn TileLookup) -> bool {
        if let Some(walkable) = self.entries.get(&coord) {
            return *walkable;
        }
        let walkable = map
            .tile_at(coord.to_world())
            .is_some_and(|tile| !tile.is_blocked());
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(coord, walkable);
        self.order.push_back(coord);
        walkable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::test_map::TestMap;

    #[test]
    fn evicts_oldest_entry_at_capacity() {
        let map = TestMap::open(0..=3, 0..=3);
        let mut cache = ValidityCache::new(2);
        cache.sync(map.generation());
        assert!(cache.is_walkable(GridCoord::new(1, 1), &map));
        assert!(cache.is_walkable(GridCoord::new(3, 3), &map));
        assert!(!cache.is_walkable(GridCoord::new(-1, 0), &map));
        assert_eq!(cache.len(), 2);
        assert!(!cache.entries.contains_key(&GridCoord::new(1, 1)));
    }

    #[test]
    fn new_generation_drops_stale_answers() {
        let mut map = TestMap::open(0..=1, 0..=1);
        let mut cache = ValidityCache::new(8);
        cache.sync(map.generation());
        assert!(cache.is_walkable(GridCoord::new(0, 0), &map));

        map.block(0, 0);
        cache.sync(map.generation());
        assert_eq!(cache.len(), 0);
        assert!(!cache.is_walkable(GridCoord::new(0, 0), &map));
    }
}
