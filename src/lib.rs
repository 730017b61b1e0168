//! Log index for page-versioned storage: per-page chains of pending redo
//! LSNs, and the background vacuum that consolidates them into page images.

#![warn(missing_docs)]

pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{
    Collaborators, HashIndex, MemoryVersionStore, RedoEngine, SourceOfRecord, VacuumCfg,
    VacuumDaemon, Vacuumer, VersionStore,
};
pub use types::{LogIndexError, Lsn, PageKey, Result};
