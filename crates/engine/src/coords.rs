use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Tolerance used by [`Vec3::approx_eq`] for world-space comparisons.
pub const WORLD_EPSILON: f32 = 1e-5;

/// World -> view projection. Rows produce view x, view y; z lifts sprites up the screen.
const ISO_BASIS_X: [f32; 3] = [16.0, 16.0, 0.0];
const ISO_BASIS_Y: [f32; 3] = [8.0, -8.0, -16.0];

/// World-space vector. Entity positions are always stored in these units.
///
/// `PartialEq` is exact; use [`Vec3::approx_eq`] when comparing positions that
/// went through arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn xy(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn approx_eq(self, other: Vec3) -> bool {
        (self.x - other.x).abs() <= WORLD_EPSILON
            && (self.y - other.y).abs() <= WORLD_EPSILON
            && (self.z - other.z).abs() <= WORLD_EPSILON
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Integer location of the tile containing this point.
    pub fn tile_location(self) -> (i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32)
    }

    /// Snaps to the integer corner of the containing tile.
    pub fn floor_world(self) -> Vec3 {
        let (x, y) = self.tile_location();
        Vec3::new(x as f32, y as f32, self.z.floor())
    }

    /// Center of the containing tile, on the ground plane.
    pub fn tile_center(self) -> Vec3 {
        let (x, y) = self.tile_location();
        Vec3::xy(x as f32 + 0.5, y as f32 + 0.5)
    }

    pub fn chunk_coord(self, chunk_size: u32) -> ChunkCoord {
        let size = chunk_size as f32;
        ChunkCoord {
            x: (self.x / size).floor() as i32,
            y: (self.y / size).floor() as i32,
        }
    }

    /// Doubled half-tile grid coordinate used by the pathfinder.
    pub fn to_grid(self) -> GridCoord {
        GridCoord {
            x: (self.x * 2.0).floor() as i32,
            y: (self.y * 2.0).floor() as i32,
        }
    }

    pub fn euclidean_2d(self, other: Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn manhattan_2d(self, other: Vec3) -> f32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Isometric screen projection, in view pixels relative to the world origin.
    pub fn to_view(self) -> (f32, f32) {
        let v = [self.x, self.y, self.z];
        let dot = |row: [f32; 3]| row[0] * v[0] + row[1] * v[1] + row[2] * v[2];
        (dot(ISO_BASIS_X), dot(ISO_BASIS_Y))
    }

    /// Inverse of [`Vec3::to_view`] for points on the ground plane.
    pub fn from_view(view_x: f32, view_y: f32) -> Vec3 {
        Vec3::xy(view_x / 32.0 + view_y / 16.0, view_x / 32.0 - view_y / 16.0)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Vec3) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;

    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Chunk index: world units divided by chunk size, floored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// World position of the chunk's minimum corner.
    pub fn origin(self, chunk_size: u32) -> Vec3 {
        let size = chunk_size as i64;
        Vec3::xy((self.x as i64 * size) as f32, (self.y as i64 * size) as f32)
    }

    /// All chunk coordinates within `radius` of this one, column by column
    /// from the west edge, each column from north to south.
    pub fn neighborhood(self, radius: u32) -> Vec<ChunkCoord> {
        let r = radius as i32;
        let side = (2 * radius + 1) as usize;
        let mut coords = Vec::with_capacity(side * side);
        for dx in -r..=r {
            for dy in (-r..=r).rev() {
                coords.push(ChunkCoord::new(self.x + dx, self.y + dy));
            }
        }
        coords
    }
}

/// Doubled half-tile grid coordinate. One world tile spans two grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn to_world(self) -> Vec3 {
        Vec3::xy(self.x as f32 / 2.0, self.y as f32 / 2.0)
    }

    pub fn chebyshev(self, other: GridCoord) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

/// Inclusive range of tile locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl TileBounds {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    pub fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        (
            x.clamp(self.min_x, self.max_x),
            y.clamp(self.min_y, self.max_y),
        )
    }
}

/// Number of chunks that must be loaded around the viewpoint chunk so that a
/// `view_width` x `view_height` pixel display never shows unloaded ground.
pub fn load_radius_for_viewport(view_width: u32, view_height: u32, chunk_size: u32) -> u32 {
    if chunk_size == 0 {
        return 1;
    }
    let half_w = view_width as f32 / 2.0;
    let half_h = view_height as f32 / 2.0;
    let mut extent = 0.0f32;
    for (vx, vy) in [
        (half_w, half_h),
        (half_w, -half_h),
        (-half_w, half_h),
        (-half_w, -half_h),
    ] {
        let corner = Vec3::from_view(vx, vy);
        extent = extent.max(corner.x.abs()).max(corner.y.abs());
    }
    ((extent / chunk_size as f32).ceil() as u32).max(1)
}
