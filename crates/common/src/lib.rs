//! Shared types for the mapstream engine.
//!
//! Everything here is plain data: ids, portion coordinates and window offsets.
//! The math that relates them lives in `mapstream-stream`.

mod types;

pub use types::{Axis, EntityId, GlobalPortionCoord, LocalOffset, MapId, StateId};

/// Default number of squares along one edge of a portion.
pub const DEFAULT_PORTION_SIZE: u32 = 16;
