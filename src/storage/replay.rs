//! Per-head consolidation: fold pending redo into a new persisted image and
//! reclaim the overflow segments that image supersedes.
//!
//! A pass runs in three phases under the head's exclusive lock:
//!
//! 1. **Base resolution** picks the image to replay onto: the one stored at
//!    the head's replayed marker, the sentinel image, a cold read from the
//!    relation file, or nothing at all for a page that does not exist yet.
//! 2. **Collection** walks the inline slot and then the overflow chain,
//!    gathering at most `max_versions` pending LSNs and choosing the prefix
//!    of segments that can be freed once the new image is durable.
//! 3. **Commit** writes the new image, deletes the superseded image,
//!    publishes the replayed marker and finally frees the chosen segments.
//!
//! The replayed marker only moves once the new image is stored and the old
//! one is gone, so a store failure up to that point leaves the head exactly
//! as it was.

use bytes::Bytes;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::storage::backend::Collaborators;
use crate::storage::chain::HeadState;
use crate::types::{LogIndexError, Lsn, PageKey, Result};

/// Upper bound on LSNs folded by one consolidation pass.
pub const MAX_REPLAY_VERSIONS: usize = 20;

/// LSNs gathered for one pass, in increasing order.
pub type PendingList = SmallVec<[Lsn; MAX_REPLAY_VERSIONS]>;

/// What a consolidation pass did to its head.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Already consolidated, nothing pending.
    Idle,
    /// Page does not exist yet and has no pending creation record.
    NoBase,
    /// Cold base image recorded under the sentinel marker.
    Seeded,
    /// Page synthesized from its single creation record.
    Created {
        /// Creation record, now the replayed marker.
        lsn: Lsn,
    },
    /// Pending records applied onto the base image.
    Consolidated {
        /// Replayed marker before the pass.
        from: Lsn,
        /// Replayed marker after the pass.
        to: Lsn,
        /// Records folded into the new image.
        applied: usize,
    },
}

impl ReplayOutcome {
    /// Number of redo records folded by this pass.
    pub fn lsns_applied(&self) -> usize {
        match self {
            ReplayOutcome::Created { .. } => 1,
            ReplayOutcome::Consolidated { applied, .. } => *applied,
            _ => 0,
        }
    }
}

/// Result of a successful pass, including reclamation counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplayReport {
    /// Tagged outcome.
    pub outcome: ReplayOutcome,
    /// Overflow segments detached and freed.
    pub segments_reclaimed: usize,
    /// Image deletions issued against the version store.
    pub images_deleted: usize,
}

enum Base {
    /// Read from the version store at the given marker.
    Stored { marker: Lsn, image: Bytes },
    /// Read from the relation file; not yet in the version store.
    Cold(Bytes),
    /// Relation does not exist yet.
    Absent,
}

impl Base {
    fn stored_marker(&self) -> Option<Lsn> {
        match self {
            Base::Stored { marker, .. } => Some(*marker),
            _ => None,
        }
    }
}

struct Collected {
    lsns: PendingList,
    /// Leading overflow segments to free after commit.
    reclaim: usize,
}

enum Commit {
    Keep(ReplayOutcome),
    Seed(Option<Bytes>),
    Write {
        marker: Lsn,
        image: Bytes,
        outcome: ReplayOutcome,
    },
}

/// Runs one consolidation pass over a head the caller holds exclusively.
pub fn consolidate(
    key: &PageKey,
    state: &mut HeadState,
    deps: &Collaborators,
    max_versions: usize,
) -> Result<ReplayReport> {
    let replayed = state.replayed_lsn;
    let base = resolve_base(key, replayed, deps)?;
    let superseded = base.stored_marker();
    let collected = collect_pending(state, max_versions);
    trace!(
        page = %key,
        replayed = replayed.0,
        pending = collected.lsns.len(),
        reclaim = collected.reclaim,
        "logindex.replay.collected"
    );
    let commit = build_commit(key, replayed, base, &collected.lsns, deps)?;

    let mut images_deleted = 0usize;
    let outcome = match commit {
        Commit::Keep(outcome) => outcome,
        Commit::Seed(image) => {
            if let Some(image) = image {
                deps.store.put(key, Lsn::SENTINEL, image)?;
            }
            state.replayed_lsn = Lsn::SENTINEL;
            ReplayOutcome::Seeded
        }
        Commit::Write {
            marker,
            image,
            outcome,
        } => {
            deps.store.put(key, marker, image)?;
            if let Some(old) = superseded.filter(|old| *old != marker) {
                if let Err(err) = deps.store.delete(key, old) {
                    if let Err(undo) = deps.store.delete(key, marker) {
                        warn!(
                            page = %key,
                            marker = marker.0,
                            error = %undo,
                            "logindex.replay.orphaned_image"
                        );
                    }
                    return Err(err);
                }
                images_deleted += 1;
            }
            state.replayed_lsn = marker;
            outcome
        }
    };

    let (segments_reclaimed, reclaimed_images) =
        reclaim_prefix(key, state, collected.reclaim, superseded, deps)?;
    images_deleted += reclaimed_images;
    debug!(
        page = %key,
        outcome = ?outcome,
        replayed = state.replayed_lsn.0,
        segments_reclaimed,
        images_deleted,
        "logindex.replay.finished"
    );
    Ok(ReplayReport {
        outcome,
        segments_reclaimed,
        images_deleted,
    })
}

fn resolve_base(key: &PageKey, replayed: Lsn, deps: &Collaborators) -> Result<Base> {
    if replayed != Lsn::ZERO {
        return match deps.store.lookup(key, replayed)? {
            Some(image) => Ok(Base::Stored {
                marker: replayed,
                image,
            }),
            None => Err(LogIndexError::MissingImage {
                key: *key,
                marker: replayed,
            }),
        };
    }
    if let Some(image) = deps.store.lookup(key, Lsn::SENTINEL)? {
        return Ok(Base::Stored {
            marker: Lsn::SENTINEL,
            image,
        });
    }
    if !deps.source.relation_exists(key)? {
        return Ok(Base::Absent);
    }
    Ok(Base::Cold(deps.source.fetch_base(key)?))
}

fn collect_pending(state: &HeadState, max_versions: usize) -> Collected {
    let replayed = state.replayed_lsn;
    let mut lsns = PendingList::new();

    if state.inline.last().is_some_and(|last| *last > replayed) {
        for lsn in state.inline.iter().filter(|lsn| **lsn > replayed) {
            if lsns.len() >= max_versions {
                break;
            }
            lsns.push(*lsn);
        }
    }

    let mut reclaim = 0usize;
    let segments = state.overflow.len();
    for (pos, segment) in state.overflow.iter().enumerate() {
        let is_tail = pos + 1 == segments;
        if segment.last().is_some_and(|last| last > replayed) {
            // A segment with uncollected work is never freed.
            if lsns.len() >= max_versions {
                break;
            }
            for lsn in segment.entries().iter().filter(|lsn| **lsn > replayed) {
                lsns.push(*lsn);
                if lsns.len() >= max_versions {
                    break;
                }
            }
            if lsns.len() >= max_versions {
                if !is_tail && lsns.last().copied() == segment.last() {
                    reclaim += 1;
                }
                break;
            }
        }
        if !is_tail {
            reclaim += 1;
        }
    }
    Collected { lsns, reclaim }
}

fn build_commit(
    key: &PageKey,
    replayed: Lsn,
    base: Base,
    lsns: &[Lsn],
    deps: &Collaborators,
) -> Result<Commit> {
    let Some((&first, rest)) = lsns.split_first() else {
        return Ok(match base {
            Base::Absent => Commit::Keep(ReplayOutcome::NoBase),
            Base::Cold(image) if replayed == Lsn::ZERO => Commit::Seed(Some(image)),
            Base::Stored { .. } if replayed == Lsn::ZERO => Commit::Seed(None),
            _ => Commit::Keep(ReplayOutcome::Idle),
        });
    };
    let last = lsns[lsns.len() - 1];
    let image = match base {
        Base::Absent => {
            let created = deps.redo.synthesize(key, first)?;
            if rest.is_empty() {
                return Ok(Commit::Write {
                    marker: first,
                    image: created,
                    outcome: ReplayOutcome::Created { lsn: first },
                });
            }
            deps.redo.apply(key, rest, created)?
        }
        Base::Stored { image, .. } | Base::Cold(image) => deps.redo.apply(key, lsns, image)?,
    };
    Ok(Commit::Write {
        marker: last,
        image,
        outcome: ReplayOutcome::Consolidated {
            from: replayed,
            to: last,
            applied: lsns.len(),
        },
    })
}

/// Frees up to `count` leading segments. The image at the current replayed
/// marker is never deleted, even when its LSN sits in a freed segment, and
/// `superseded` was already deleted by the commit.
fn reclaim_prefix(
    key: &PageKey,
    state: &mut HeadState,
    count: usize,
    superseded: Option<Lsn>,
    deps: &Collaborators,
) -> Result<(usize, usize)> {
    let mut segments = 0usize;
    let mut images = 0usize;
    for _ in 0..count {
        if state.overflow.len() < 2 {
            break;
        }
        let keep = state.replayed_lsn;
        if let Some(front) = state.overflow.front() {
            let skip = |lsn: Lsn| lsn == keep || Some(lsn) == superseded;
            for lsn in front.entries().iter().filter(|lsn| !skip(**lsn)) {
                deps.store.delete(key, *lsn)?;
                images += 1;
            }
        }
        if state.detach_front().is_some() {
            segments += 1;
        }
    }
    Ok((segments, images))
}
