use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use thiserror::Error;
use tracing::debug;

use super::astar::{AstarJob, PathOutcome};
use super::validity::ValidityCache;
use crate::coords::{TileBounds, Vec3};
use crate::world::TileLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathfinderError {
    #[error("cannot plan a path while no terrain is loaded")]
    TerrainNotLoaded,
}

/// Pool of A* searches sharing one per-tick expansion budget.
///
/// Jobs are submitted, advanced a slice at a time, and collected exactly
/// once; collected or cancelled ids are reused.
#[derive(Debug)]
pub struct Pathfinder {
    jobs: BTreeMap<JobId, AstarJob>,
    completed: BTreeSet<JobId>,
    recycled: Vec<JobId>,
    next_id: u32,
    cache: ValidityCache,
}

impl Pathfinder {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            completed: BTreeSet::new(),
            recycled: Vec::new(),
            next_id: 0,
            cache: ValidityCache::new(cache_capacity),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.len() - self.completed.len()
    }

    pub fn is_complete(&self, id: JobId) -> bool {
        self.completed.contains(&id)
    }

    pub fn cached_cells(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    /// Queues a search from `start` toward the walkable tile nearest to
    /// `destination`. Returns the job id and the snapped destination (a tile
    /// center); when no loaded tile is walkable the job is already resolved as
    /// unreachable and the destination is returned unchanged.
    pub fn submit_job(
        &mut self,
        start: Vec3,
        destination: Vec3,
        map: &dyn TileLookup,
    ) -> Result<(JobId, Vec3), PathfinderError> {
        let bounds = map
            .loaded_bounds()
            .ok_or(PathfinderError::TerrainNotLoaded)?;
        self.cache.sync(map.generation());

        let id = self.allocate_id();
        let start_grid = start.tile_center().to_grid();
        let (job, snapped) = match nearest_walkable_tile(destination, bounds, map) {
            Some(target) => (AstarJob::new(start_grid, target.to_grid()), target),
            None => {
                let unreachable = AstarJob::resolved(
                    start_grid,
                    destination.tile_center().to_grid(),
                    PathOutcome::Unreachable,
                );
                self.completed.insert(id);
                (unreachable, destination)
            }
        };
        debug!(
            job_id = id.0,
            start_x = start_grid.x,
            start_y = start_grid.y,
            goal_x = job.destination().x,
            goal_y = job.destination().y,
            resolved = job.is_done(),
            "path_job_submitted"
        );
        self.jobs.insert(id, job);
        Ok((id, snapped))
    }

    /// Spends up to `cycle_budget` expansions across every unfinished job,
    /// split evenly with at least one expansion each.
    pub fn advance(&mut self, cycle_budget: u32, map: &dyn TileLookup) {
        let pending = self.pending_count();
        if pending == 0 {
            return;
        }
        self.cache.sync(map.generation());
        let share = (cycle_budget / pending as u32).max(1);
        let cache = &mut self.cache;
        for (id, job) in self.jobs.iter_mut() {
            if job.is_done() {
                continue;
            }
            job.search(share, &mut |coord| cache.is_walkable(coord, map));
            if job.is_done() {
                self.completed.insert(*id);
                debug!(job_id = id.0, cycles = job.cycles(), "path_job_completed");
            }
        }
    }

    /// The job's outcome once it is finished. The job is then forgotten and
    /// its id may be handed out again.
    pub fn collect(&mut self, id: JobId) -> Option<PathOutcome> {
        if !self.completed.remove(&id) {
            return None;
        }
        let outcome = self.jobs.remove(&id).and_then(|mut job| job.take_outcome());
        self.recycled.push(id);
        outcome
    }

    /// Drops a job whether or not it has finished.
    pub fn cancel(&mut self, id: JobId) -> bool {
        if self.jobs.remove(&id).is_none() {
            return false;
        }
        self.completed.remove(&id);
        self.recycled.push(id);
        debug!(job_id = id.0, "path_job_cancelled");
        true
    }

    fn allocate_id(&mut self) -> JobId {
        if let Some(id) = self.recycled.pop() {
            return id;
        }
        let id = JobId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

/// Center of the walkable tile closest to `destination`: clamp into the
/// loaded area, then breadth-first over the four edge neighbours. Holes in
/// the resident set are crossed, never chosen; the loaded bounds cap the
/// search.
fn nearest_walkable_tile(
    destination: Vec3,
    bounds: TileBounds,
    map: &dyn TileLookup,
) -> Option<Vec3> {
    let (x, y) = if destination.is_finite() {
        destination.tile_location()
    } else {
        (bounds.min_x, bounds.min_y)
    };
    let origin = bounds.clamp(x, y);
    let mut queue = VecDeque::from([origin]);
    let mut seen = HashSet::from([origin]);
    while let Some((tx, ty)) = queue.pop_front() {
        let center = Vec3::xy(tx as f32 + 0.5, ty as f32 + 0.5);
        if map.tile_at(center).is_some_and(|tile| !tile.is_blocked()) {
            return Some(center);
        }
        for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            let next = (tx + dx, ty + dy);
            if bounds.contains(next.0, next.1) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::GridCoord;
    use crate::nav::test_map::TestMap;

    fn run_to_completion(pathfinder: &mut Pathfinder, id: JobId, map: &TestMap) -> PathOutcome {
        for _ in 0..1_000 {
            if let Some(outcome) = pathfinder.collect(id) {
                return outcome;
            }
            pathfinder.advance(128, map);
        }
        panic!("job {id:?} never finished");
    }

    #[test]
    fn blocked_tile_forces_detour_with_single_turn() {
        let mut map = TestMap::open(0..=2, -1..=1);
        map.block(1, 1);
        let mut pathfinder = Pathfinder::new(64);

        let (id, snapped) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(2.5, 0.5), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(2.5, 0.5));

        let outcome = run_to_completion(&mut pathfinder, id, &map);
        let steps = outcome.steps().expect("path found");
        assert_eq!(steps.start(), GridCoord::new(1, 1));
        assert_eq!(steps.len(), 4);
        assert_eq!(steps.turn_count(), 1);
        assert_eq!(
            steps.waypoints(),
            vec![
                Vec3::xy(1.0, 0.0),
                Vec3::xy(1.5, -0.5),
                Vec3::xy(2.0, 0.0),
                Vec3::xy(2.5, 0.5),
            ]
        );
        assert_eq!(steps.next_from(GridCoord::new(1, 1)), Some(GridCoord::new(2, 0)));
    }

    #[test]
    fn open_ground_path_has_one_turn() {
        let map = TestMap::open(0..=3, -1..=2);
        let mut pathfinder = Pathfinder::new(64);
        let (id, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(2.5, 0.5), &map)
            .expect("submit");
        let outcome = run_to_completion(&mut pathfinder, id, &map);
        let steps = outcome.steps().expect("path found");
        assert_eq!(steps.len(), 4);
        assert_eq!(steps.turn_count(), 1);
    }

    #[test]
    fn enclosed_destination_is_unreachable() {
        let mut map = TestMap::open(0..=6, 0..=6);
        for x in 4..=6 {
            for y in 4..=6 {
                if (x, y) != (5, 5) {
                    map.block(x, y);
                }
            }
        }
        let mut pathfinder = Pathfinder::new(1024);
        let (id, snapped) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(5.5, 5.5), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(5.5, 5.5));
        assert_eq!(
            run_to_completion(&mut pathfinder, id, &map),
            PathOutcome::Unreachable
        );
    }

    #[test]
    fn destination_snaps_to_nearest_walkable_loaded_tile() {
        let mut map = TestMap::open(0..=4, 0..=4);
        map.block(2, 2);
        let mut pathfinder = Pathfinder::new(64);

        let (_, snapped) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(2.2, 2.7), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(1.5, 2.5));

        let (_, snapped) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(40.0, -3.0), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(4.5, 0.5));
    }

    #[test]
    fn snapping_crosses_unloaded_holes() {
        let mut map = TestMap::open(0..=4, 0..=4);
        for (x, y) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            map.unload(x, y);
        }
        let mut pathfinder = Pathfinder::new(64);

        let (id, snapped) = pathfinder
            .submit_job(Vec3::xy(3.5, 3.5), Vec3::xy(-3.0, -3.0), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(2.5, 0.5));
        assert!(!pathfinder.is_complete(id));

        let (_, snapped) = pathfinder
            .submit_job(Vec3::xy(3.5, 3.5), Vec3::xy(0.5, 1.5), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(0.5, 2.5));
    }

    #[test]
    fn fully_blocked_terrain_resolves_immediately() {
        let mut map = TestMap::open(0..=1, 0..=1);
        for (x, y) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            map.block(x, y);
        }
        let mut pathfinder = Pathfinder::new(64);
        let (id, snapped) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(1.2, 1.2), &map)
            .expect("submit");
        assert_eq!(snapped, Vec3::xy(1.2, 1.2));
        assert!(pathfinder.is_complete(id));
        assert_eq!(pathfinder.collect(id), Some(PathOutcome::Unreachable));
    }

    #[test]
    fn submitting_without_terrain_fails() {
        let map = TestMap::default();
        let mut pathfinder = Pathfinder::new(64);
        assert_eq!(
            pathfinder.submit_job(Vec3::ZERO, Vec3::xy(1.0, 1.0), &map),
            Err(PathfinderError::TerrainNotLoaded)
        );
        assert_eq!(pathfinder.job_count(), 0);
    }

    #[test]
    fn small_budget_spreads_search_over_ticks() {
        let map = TestMap::open(0..=15, 0..=15);
        let mut pathfinder = Pathfinder::new(4096);
        let (id, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(14.5, 12.5), &map)
            .expect("submit");

        let mut ticks = 0;
        let outcome = loop {
            if let Some(outcome) = pathfinder.collect(id) {
                break outcome;
            }
            pathfinder.advance(1, &map);
            ticks += 1;
            assert!(ticks < 10_000, "search never finished");
        };
        assert!(ticks > 1);
        assert_eq!(outcome.steps().map(|steps| steps.len()), Some(28));
    }

    #[test]
    fn collected_ids_are_recycled() {
        let map = TestMap::open(0..=3, 0..=3);
        let mut pathfinder = Pathfinder::new(64);
        let (first, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(2.5, 2.5), &map)
            .expect("submit");
        assert_eq!(pathfinder.collect(first), None, "still pending");
        let outcome = run_to_completion(&mut pathfinder, first, &map);
        assert!(outcome.is_found());
        assert_eq!(pathfinder.collect(first), None, "collected once");

        let (second, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(3.5, 1.5), &map)
            .expect("submit");
        assert_eq!(second, first);
        assert_eq!(pathfinder.collect(second), None, "old result is gone");
        assert_eq!(pathfinder.job_count(), 1);
    }

    #[test]
    fn cancel_frees_the_job() {
        let map = TestMap::open(0..=3, 0..=3);
        let mut pathfinder = Pathfinder::new(64);
        let (id, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(2.5, 2.5), &map)
            .expect("submit");
        assert!(pathfinder.cancel(id));
        assert!(!pathfinder.cancel(id));
        assert_eq!(pathfinder.job_count(), 0);
        assert_eq!(pathfinder.collect(id), None);
    }

    #[test]
    fn budget_is_shared_between_pending_jobs() {
        let map = TestMap::open(0..=15, 0..=15);
        let mut pathfinder = Pathfinder::new(4096);
        let (a, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(14.5, 14.5), &map)
            .expect("submit");
        let (b, _) = pathfinder
            .submit_job(Vec3::xy(14.5, 0.5), Vec3::xy(0.5, 14.5), &map)
            .expect("submit");

        pathfinder.advance(2, &map);
        assert_eq!(pathfinder.jobs[&a].cycles(), 1);
        assert_eq!(pathfinder.jobs[&b].cycles(), 1);
    }

    #[test]
    fn cache_follows_terrain_generation() {
        let mut map = TestMap::open(0..=3, 0..=3);
        let mut pathfinder = Pathfinder::new(4);
        let (id, _) = pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(3.5, 3.5), &map)
            .expect("submit");
        pathfinder.advance(8, &map);
        assert!(pathfinder.cached_cells() <= 4);
        assert!(pathfinder.cached_cells() > 0);

        map.block(3, 0);
        pathfinder.cancel(id);
        pathfinder
            .submit_job(Vec3::xy(0.5, 0.5), Vec3::xy(3.5, 3.5), &map)
            .expect("submit");
        assert_eq!(pathfinder.cached_cells(), 0);

        pathfinder.advance(8, &map);
        pathfinder.invalidate_cache();
        assert_eq!(pathfinder.cached_cells(), 0);
    }
}
