use std::collections::VecDeque;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::primitives::concurrency::CooldownStamp;
use crate::types::{LogIndexError, Lsn, PageKey, Result};

/// Capacity of the inline slot and of every overflow segment.
pub const PENDING_BATCH_LEN: usize = 8;

/// Fixed-capacity run of pending LSNs.
pub type LsnBatch = SmallVec<[Lsn; PENDING_BATCH_LEN]>;

/// Overflow segment holding pending LSNs that did not fit inline.
#[derive(Debug, Default, Clone)]
pub struct Segment {
    entries: LsnBatch,
}

impl Segment {
    fn with_first(lsn: Lsn) -> Self {
        let mut entries = LsnBatch::new();
        entries.push(lsn);
        Self { entries }
    }

    /// Pending LSNs in increasing order.
    pub fn entries(&self) -> &[Lsn] {
        &self.entries
    }

    /// Newest LSN in the segment.
    pub fn last(&self) -> Option<Lsn> {
        self.entries.last().copied()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= PENDING_BATCH_LEN
    }
}

/// Mutable state of a head, guarded by the head lock.
#[derive(Debug, Default)]
pub struct HeadState {
    pub(crate) replayed_lsn: Lsn,
    pub(crate) inline: LsnBatch,
    /// Front is the oldest segment, back is the open tail.
    pub(crate) overflow: VecDeque<Segment>,
}

impl HeadState {
    /// Highest LSN folded into a persisted image, or [`Lsn::ZERO`].
    pub fn replayed_lsn(&self) -> Lsn {
        self.replayed_lsn
    }

    /// Inline pending LSNs.
    pub fn inline_entries(&self) -> &[Lsn] {
        &self.inline
    }

    /// Overflow segments, oldest first.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.overflow.iter()
    }

    /// Number of linked overflow segments.
    pub fn segment_count(&self) -> usize {
        self.overflow.len()
    }

    /// Newest LSN anywhere in the chain.
    pub fn newest_lsn(&self) -> Option<Lsn> {
        self.overflow
            .back()
            .and_then(Segment::last)
            .or_else(|| self.inline.last().copied())
    }

    /// Every LSN in the chain in link order, consolidated or not.
    pub fn chain_lsns(&self) -> impl Iterator<Item = Lsn> + '_ {
        self.inline
            .iter()
            .copied()
            .chain(self.overflow.iter().flat_map(|seg| seg.entries.iter().copied()))
    }

    /// LSNs newer than the replayed marker, i.e. still awaiting consolidation.
    pub fn pending_lsns(&self) -> Vec<Lsn> {
        let replayed = self.replayed_lsn;
        self.chain_lsns().filter(|lsn| *lsn > replayed).collect()
    }

    /// Foreground append. Fills the inline slot, then the open tail segment,
    /// then opens a new tail.
    pub fn push_pending(&mut self, lsn: Lsn) -> Result<()> {
        if lsn.is_reserved() {
            return Err(LogIndexError::Invalid("lsn collides with a reserved marker"));
        }
        if lsn <= self.replayed_lsn {
            return Err(LogIndexError::Invalid("lsn already consolidated"));
        }
        if self.newest_lsn().is_some_and(|newest| lsn <= newest) {
            return Err(LogIndexError::Invalid("pending lsns must increase"));
        }
        if self.inline.len() < PENDING_BATCH_LEN {
            self.inline.push(lsn);
            return Ok(());
        }
        match self.overflow.back_mut() {
            Some(tail) if !tail.is_full() => tail.entries.push(lsn),
            _ => self.overflow.push_back(Segment::with_first(lsn)),
        }
        Ok(())
    }

    /// Detaches the oldest segment and hands its ownership to the caller.
    /// The open tail is never detached.
    pub(crate) fn detach_front(&mut self) -> Option<Segment> {
        if self.overflow.len() < 2 {
            return None;
        }
        self.overflow.pop_front()
    }
}

/// Index entry for one page: identity plus its locked pending chain.
#[derive(Debug)]
pub struct Head {
    key: PageKey,
    state: RwLock<HeadState>,
    last_vacuum: CooldownStamp,
}

/// Point-in-time copy of a head's progress, for readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSnapshot {
    /// Marker of the newest persisted image.
    pub replayed_lsn: Lsn,
    /// Records still to be replayed on top of that image.
    pub pending: Vec<Lsn>,
}

impl Head {
    /// Creates an empty head for `key`.
    pub fn new(key: PageKey) -> Self {
        Self {
            key,
            state: RwLock::new(HeadState::default()),
            last_vacuum: CooldownStamp::new(),
        }
    }

    /// Page identity.
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    /// Time of the last consolidation attempt. Only stamped while the head
    /// lock is held exclusively.
    pub fn last_vacuum(&self) -> &CooldownStamp {
        &self.last_vacuum
    }

    /// Blocking exclusive lock, used by the foreground write path.
    pub fn write(&self) -> RwLockWriteGuard<'_, HeadState> {
        self.state.write()
    }

    /// Blocking shared lock.
    pub fn read(&self) -> RwLockReadGuard<'_, HeadState> {
        self.state.read()
    }

    /// Non-blocking exclusive lock used by the vacuumer.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, HeadState>> {
        self.state.try_write()
    }

    /// Copies the replayed marker and the still-pending LSNs.
    pub fn snapshot(&self) -> PendingSnapshot {
        let state = self.state.read();
        PendingSnapshot {
            replayed_lsn: state.replayed_lsn,
            pending: state.pending_lsns(),
        }
    }
}
