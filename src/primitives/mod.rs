//! Low-level primitives for the log index.

/// Non-blocking latches and cooldown timestamps.
///
/// Background work in this crate never waits on a lock it does not already
/// own; these types make that explicit in their signatures.
pub mod concurrency;
