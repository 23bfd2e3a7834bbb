use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Identifier of an authored map object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an object state (page) an entity can be in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StateId(pub u32);

/// Identifier of a map inside a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

impl MapId {
    /// Directory name of the map inside the project's `maps/` folder.
    pub fn dir_name(self) -> String {
        format!("MAP{:04}", self.0)
    }
}

/// A portion in absolute map space.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GlobalPortionCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GlobalPortionCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component along `axis`.
    pub fn along(self, axis: Axis) -> i32 {
        match axis {
            Axis::EastWest => self.x,
            Axis::UpDown => self.y,
            Axis::NorthSouth => self.z,
        }
    }

    /// Copy of `self` moved by `delta` portions along `axis`.
    pub fn stepped(self, axis: Axis, delta: i32) -> Self {
        let mut out = self;
        match axis {
            Axis::EastWest => out.x += delta,
            Axis::UpDown => out.y += delta,
            Axis::NorthSouth => out.z += delta,
        }
        out
    }
}

impl fmt::Display for GlobalPortionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Add<LocalOffset> for GlobalPortionCoord {
    type Output = GlobalPortionCoord;

    fn add(self, rhs: LocalOffset) -> Self::Output {
        GlobalPortionCoord::new(self.x + rhs.dx, self.y + rhs.dy, self.z + rhs.dz)
    }
}

/// Offset of a portion relative to the window center.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalOffset {
    pub dx: i32,
    pub dy: i32,
    pub dz: i32,
}

impl LocalOffset {
    pub const ZERO: Self = Self::new(0, 0, 0);

    pub const fn new(dx: i32, dy: i32, dz: i32) -> Self {
        Self { dx, dy, dz }
    }

    /// Build an offset from a coordinate along `axis` plus the two remaining
    /// coordinates, in `(x, y, z)` order with the axis component removed.
    pub fn compose(axis: Axis, along: i32, u: i32, v: i32) -> Self {
        match axis {
            Axis::EastWest => Self::new(along, u, v),
            Axis::UpDown => Self::new(u, along, v),
            Axis::NorthSouth => Self::new(u, v, along),
        }
    }

    /// Largest absolute component.
    pub fn chebyshev(self) -> i32 {
        self.dx.abs().max(self.dy.abs()).max(self.dz.abs())
    }
}

impl fmt::Display for LocalOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.dx, self.dy, self.dz)
    }
}

/// Streaming axes, in the order the window shifts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Local and global `x`.
    EastWest,
    /// Local and global `z`.
    NorthSouth,
    /// Local and global `y`.
    UpDown,
}

impl Axis {
    pub const SHIFT_ORDER: [Axis; 3] = [Axis::EastWest, Axis::NorthSouth, Axis::UpDown];
}
