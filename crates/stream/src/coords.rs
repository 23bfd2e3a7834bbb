use mapstream_common::{GlobalPortionCoord, LocalOffset};

/// Linear address of a window slot inside the portion store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RingSlot(pub usize);

/// A local offset that lies outside the configured streaming radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("local offset {offset} exceeds streaming radius {limit}")]
pub struct IndexingError {
    pub offset: LocalOffset,
    pub limit: u32,
}

/// Side length of the window for a streaming radius.
pub fn window_size(limit: u32) -> usize {
    2 * limit as usize + 1
}

/// Number of slots in the window (`size^3`).
pub fn window_capacity(limit: u32) -> usize {
    let size = window_size(limit);
    size * size * size
}

/// Convert a world position (in squares) to the portion containing it.
///
/// Each axis is floor-divided, so negative positions round toward negative
/// infinity: `-0.5` lands in portion `-1`, not `0`.
pub fn to_global_portion(position: glam::Vec3, portion_size: u32) -> GlobalPortionCoord {
    let size = portion_size as f32;
    GlobalPortionCoord {
        x: (position.x / size).floor() as i32,
        y: (position.y / size).floor() as i32,
        z: (position.z / size).floor() as i32,
    }
}

/// Offset of `global` relative to the window center `current`.
pub fn local_offset(global: GlobalPortionCoord, current: GlobalPortionCoord) -> LocalOffset {
    LocalOffset {
        dx: global.x - current.x,
        dy: global.y - current.y,
        dz: global.z - current.z,
    }
}

/// Whether an offset addresses a slot of a window with radius `limit`.
pub fn is_in_window(offset: LocalOffset, limit: u32) -> bool {
    offset.chebyshev() as i64 <= limit as i64
}

/// Map a local offset to its ring slot: `((x+limit)*size + (y+limit))*size + (z+limit)`.
pub fn to_ring_slot(offset: LocalOffset, limit: u32) -> Result<RingSlot, IndexingError> {
    if !is_in_window(offset, limit) {
        return Err(IndexingError { offset, limit });
    }
    let l = limit as i64;
    let size = window_size(limit) as i64;
    let x = offset.dx as i64 + l;
    let y = offset.dy as i64 + l;
    let z = offset.dz as i64 + l;
    Ok(RingSlot(((x * size + y) * size + z) as usize))
}

/// Inverse of [`to_ring_slot`]. Returns `None` for slots past the capacity.
pub fn from_ring_slot(slot: RingSlot, limit: u32) -> Option<LocalOffset> {
    if slot.0 >= window_capacity(limit) {
        return None;
    }
    let size = window_size(limit);
    let l = limit as i32;
    let z = (slot.0 % size) as i32;
    let y = ((slot.0 / size) % size) as i32;
    let x = (slot.0 / (size * size)) as i32;
    Some(LocalOffset::new(x - l, y - l, z - l))
}

/// All offsets of a window in ring-slot order.
pub fn window_offsets(limit: u32) -> impl Iterator<Item = LocalOffset> {
    let l = limit as i32;
    (-l..=l).flat_map(move |x| {
        (-l..=l).flat_map(move |y| (-l..=l).map(move |z| LocalOffset::new(x, y, z)))
    })
}
