use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, MutexGuard};

/// Exclusive token that is only ever taken without blocking.
///
/// At most one holder exists at a time; a failed attempt means somebody else
/// is already doing the guarded work and the caller should move on.
#[derive(Default)]
pub struct TryLatch {
    inner: Mutex<()>,
}

/// Guard representing a held [`TryLatch`]. Dropping it releases the latch.
pub struct LatchGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl TryLatch {
    /// Creates an unheld latch.
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::const_mutex(()),
        }
    }

    /// Attempts to take the latch, returning `None` if it is already held.
    pub fn try_acquire(&self) -> Option<LatchGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| LatchGuard { _guard: guard })
    }

    /// Returns whether some thread currently holds the latch.
    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Millisecond timestamp of the last completed unit of work.
///
/// Zero means "never", which is always due.
#[derive(Default, Debug)]
pub struct CooldownStamp {
    last_ms: AtomicU64,
}

impl CooldownStamp {
    /// Creates a stamp that has never fired.
    pub const fn new() -> Self {
        Self {
            last_ms: AtomicU64::new(0),
        }
    }

    /// Returns true once `cooldown` has elapsed since the last stamp.
    pub fn is_due(&self, now_ms: u64, cooldown: Duration) -> bool {
        let last = self.last_ms.load(Ordering::Acquire);
        if last == 0 {
            return true;
        }
        let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(last) >= cooldown_ms
    }

    /// Records `now_ms` as the completion time.
    pub fn stamp(&self, now_ms: u64) {
        self.last_ms.store(now_ms.max(1), Ordering::Release);
    }

    /// Returns the raw timestamp, 0 if never stamped.
    pub fn last_ms(&self) -> u64 {
        self.last_ms.load(Ordering::Acquire)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
