mod collision;
mod spatial_grid;

pub use collision::{min_corner, overlap, CollisionResolver, ResolveReport};
pub use spatial_grid::{CellKey, QueryRect, RangeQuery, SpatialHashGrid};
