//! Map kernel: engine configuration, the explicit per-map context and the
//! per-tick update driver.
//!
//! # Invariants
//! - Load results are applied at the start of a tick, never from a loader
//!   thread.
//! - Portions are only requested once the autotile atlases are baked.
//! - Object records outlive portions and map visits.

mod config;
mod engine;
mod session;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use session::{LoadPhase, MapSession, MapTextures, TickReport};

use mapstream_persist::{LoadError, MapError, RecordError, StoreError};

/// Errors surfaced by the kernel.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("map entry aborted: {0}")]
    MapEntry(#[source] LoadError),
    #[error("could not start portion loader: {0}")]
    LoaderSpawn(#[source] std::io::Error),
}
