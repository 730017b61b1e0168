//! Page-version log index and its background vacuum.
//!
//! The foreground appends redo LSNs to per-page heads in a [`HashIndex`];
//! [`Vacuumer`] workers fold those LSNs into consolidated images held by a
//! [`VersionStore`] and free the overflow segments left behind.

/// Collaborator traits and the in-memory version store.
pub mod backend;
/// Per-page pending chains.
pub mod chain;
/// Partitioned hash index of heads.
pub mod index;
/// Vacuum observability hooks.
pub mod metrics;
/// Scheduler configuration.
pub mod options;
/// Single-head consolidation.
pub mod replay;
/// Bucket scheduler and worker threads.
pub mod vacuum;

pub use backend::{Collaborators, MemoryVersionStore, RedoEngine, SourceOfRecord, VersionStore};
pub use chain::{Head, HeadState, PendingSnapshot, Segment, PENDING_BATCH_LEN};
pub use index::{Bucket, HashIndex, DEFAULT_HEAD_BATCH};
pub use metrics::{default_metrics, CounterMetrics, CounterSnapshot, NoopMetrics, VacuumMetrics};
pub use options::VacuumCfg;
pub use replay::{consolidate, ReplayOutcome, ReplayReport, MAX_REPLAY_VERSIONS};
pub use vacuum::{BucketPass, BucketVacuumStats, HeadVisit, VacuumDaemon, Vacuumer};
