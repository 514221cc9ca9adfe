mod astar;
mod pathfinder;
mod validity;

pub use astar::{Direction, PathOutcome, PathSteps};
pub use pathfinder::{JobId, Pathfinder, PathfinderError};
