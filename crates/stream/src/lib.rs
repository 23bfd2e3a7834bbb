//! Streaming: portion coordinate math, the ring-buffer portion store and the
//! moving window that keeps a bounded neighborhood loaded around a reference
//! point.
//!
//! # Invariants
//! - The store always holds exactly `(2*limit+1)^3` slots; an empty slot is
//!   the absence sentinel, never a dangling value.
//! - A slot only accepts the result of the latest load issued for it.
//! - Eviction clears a portion before its slot is reused.

mod coords;
mod store;
mod window;

pub use coords::{
    IndexingError, RingSlot, from_ring_slot, is_in_window, local_offset, to_global_portion,
    to_ring_slot, window_capacity, window_offsets, window_size,
};
pub use store::PortionStore;
pub use window::{Completion, Evict, LoadTicket, MovingWindow, ShiftReport};
