//! Persistence: map project files, portion decoding, persistent object
//! records and the asynchronous portion loader.
//!
//! # Invariants
//! - A portion is only built from a fully decoded file; malformed files are
//!   reported as data corruption, never installed.
//! - Object records are keyed by global portion coordinate and outlive the
//!   portions that mirror them.
//! - Saved records are verified against their sha256 before decoding.

mod loader;
mod map;
mod portion;
mod records;
mod store;

pub use loader::{
    DirectorySource, LoadCompletion, LoadError, MemorySource, PortionLoader, PortionSource,
    portion_file_name, read_portion,
};
pub use map::{
    MapError, MapInfo, MapProject, ObjectRoster, PortionBounds, RosterEntry, Tileset,
    TilesetCatalog,
};
pub use portion::{Land, MapObject, Portion, PortionContent, PortionFile, TileRef, decode_portion};
pub use records::{Movement, ObjectPortionRecord, ObjectRecords, RecordError};
pub use store::{IntegrityManifest, RecordStore, StoreError};
