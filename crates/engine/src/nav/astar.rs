use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::coords::{GridCoord, Vec3};

/// The four diagonal moves of the doubled grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::NorthEast,
        Direction::NorthWest,
        Direction::SouthEast,
        Direction::SouthWest,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::NorthEast => (1, 1),
            Direction::NorthWest => (-1, 1),
            Direction::SouthEast => (1, -1),
            Direction::SouthWest => (-1, -1),
        }
    }

    pub fn between(from: GridCoord, to: GridCoord) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|direction| direction.delta() == (to.x - from.x, to.y - from.y))
    }
}

/// Parent -> child steps of a found path, starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSteps {
    start: GridCoord,
    steps: HashMap<GridCoord, GridCoord>,
}

impl PathSteps {
    pub fn start(&self) -> GridCoord {
        self.start
    }

    pub fn steps(&self) -> &HashMap<GridCoord, GridCoord> {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn next_from(&self, coord: GridCoord) -> Option<GridCoord> {
        self.steps.get(&coord).copied()
    }

    /// Grid cells visited after the start, in walking order.
    pub fn grid_route(&self) -> Vec<GridCoord> {
        let mut route = Vec::with_capacity(self.steps.len());
        let mut cursor = self.start;
        while let Some(next) = self.steps.get(&cursor) {
            if route.len() >= self.steps.len() {
                break;
            }
            route.push(*next);
            cursor = *next;
        }
        route
    }

    /// World positions of [`PathSteps::grid_route`].
    pub fn waypoints(&self) -> Vec<Vec3> {
        self.grid_route()
            .into_iter()
            .map(GridCoord::to_world)
            .collect()
    }

    pub fn turn_count(&self) -> u32 {
        let mut turns = 0;
        let mut previous = None;
        let mut cursor = self.start;
        for next in self.grid_route() {
            let direction = Direction::between(cursor, next);
            if previous.is_some() && direction != previous {
                turns += 1;
            }
            previous = direction;
            cursor = next;
        }
        turns
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    Found(PathSteps),
    Unreachable,
}

impl PathOutcome {
    pub fn steps(&self) -> Option<&PathSteps> {
        match self {
            PathOutcome::Found(steps) => Some(steps),
            PathOutcome::Unreachable => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PathOutcome::Found(_))
    }
}

/// Search states carry the heading they were entered with so turn counts
/// stay exact when two headings reach the same cell.
type StateKey = (GridCoord, Option<Direction>);

#[derive(Debug, Clone, Copy)]
struct NodeRecord {
    cost: u32,
    turns: u32,
    parent: Option<StateKey>,
}

/// Heap order: estimated total, then turns, then cost so far; coordinates and
/// heading only make the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OpenEntry {
    estimate: u32,
    turns: u32,
    cost: u32,
    x: i32,
    y: i32,
    heading: Option<Direction>,
}

/// One resumable A* search over the doubled grid. Each step moves one cell
/// diagonally at unit cost and is only allowed when the target cell and both
/// cells it cuts past are walkable.
#[derive(Debug)]
pub(crate) struct AstarJob {
    start: GridCoord,
    destination: GridCoord,
    open: BinaryHeap<Reverse<OpenEntry>>,
    nodes: HashMap<StateKey, NodeRecord>,
    outcome: Option<PathOutcome>,
    cycles: u64,
}

impl AstarJob {
    pub(crate) fn new(start: GridCoord, destination: GridCoord) -> Self {
        let mut job = Self {
            start,
            destination,
            open: BinaryHeap::new(),
            nodes: HashMap::new(),
            outcome: None,
            cycles: 0,
        };
        job.nodes.insert(
            (start, None),
            NodeRecord {
                cost: 0,
                turns: 0,
                parent: None,
            },
        );
        job.open.push(Reverse(OpenEntry {
            estimate: start.chebyshev(destination),
            turns: 0,
            cost: 0,
            x: start.x,
            y: start.y,
            heading: None,
        }));
        job
    }

    pub(crate) fn resolved(start: GridCoord, destination: GridCoord, outcome: PathOutcome) -> Self {
        Self {
            start,
            destination,
            open: BinaryHeap::new(),
            nodes: HashMap::new(),
            outcome: Some(outcome),
            cycles: 0,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    pub(crate) fn cycles(&self) -> u64 {
        self.cycles
    }

    pub(crate) fn destination(&self) -> GridCoord {
        self.destination
    }

    pub(crate) fn take_outcome(&mut self) -> Option<PathOutcome> {
        self.outcome.take()
    }

    /// Expands at most `budget` frontier entries.
    pub(crate) fn search(&mut self, budget: u32, walkable: &mut dyn FnMut(GridCoord) -> bool) {
        let mut remaining = budget;
        while remaining > 0 && self.outcome.is_none() {
            let Some(Reverse(entry)) = self.open.pop() else {
                self.outcome = Some(PathOutcome::Unreachable);
                return;
            };
            remaining -= 1;
            self.cycles += 1;

            let here = GridCoord::new(entry.x, entry.y);
            let key = (here, entry.heading);
            let Some(node) = self.nodes.get(&key).copied() else {
                continue;
            };
            if node.cost != entry.cost || node.turns != entry.turns {
                continue;
            }
            if here == self.destination {
                self.outcome = Some(PathOutcome::Found(self.reconstruct(key)));
                return;
            }

            for heading in Direction::ALL {
                let (dx, dy) = heading.delta();
                let next = GridCoord::new(here.x + dx, here.y + dy);
                if !walkable(next)
                    || !walkable(GridCoord::new(next.x, here.y))
                    || !walkable(GridCoord::new(here.x, next.y))
                {
                    continue;
                }
                let cost = node.cost + 1;
                let turned = matches!(entry.heading, Some(previous) if previous != heading);
                let turns = node.turns + u32::from(turned);
                let next_key = (next, Some(heading));
                let improves = match self.nodes.get(&next_key) {
                    Some(known) => (cost, turns) < (known.cost, known.turns),
                    None => true,
                };
                if !improves {
                    continue;
                }
                self.nodes.insert(
                    next_key,
                    NodeRecord {
                        cost,
                        turns,
                        parent: Some(key),
                    },
                );
                self.open.push(Reverse(OpenEntry {
                    estimate: cost + next.chebyshev(self.destination),
                    turns,
                    cost,
                    x: next.x,
                    y: next.y,
                    heading: Some(heading),
                }));
            }
        }
        if self.outcome.is_none() && self.open.is_empty() {
            self.outcome = Some(PathOutcome::Unreachable);
        }
    }

    fn reconstruct(&self, goal: StateKey) -> PathSteps {
        let mut steps = HashMap::new();
        let mut cursor = goal;
        while let Some(parent) = self.nodes.get(&cursor).and_then(|node| node.parent) {
            steps.insert(parent.0, cursor.0);
            cursor = parent;
        }
        PathSteps {
            start: self.start,
            steps,
        }
    }
}
