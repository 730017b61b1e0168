use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks for observing the background vacuum.
///
/// Implementations must be cheap; they are called from worker threads while
/// bucket latches are held.
pub trait VacuumMetrics: Send + Sync {
    /// A bucket pass ran to completion.
    fn bucket_pass_completed(&self);

    /// A bucket was skipped because another worker held it or it was cooling down.
    ///
    /// # Parameters
    /// * `reason` - `"busy"`, `"cooldown"` or `"interrupted"`.
    fn bucket_pass_skipped(&self, reason: &'static str);

    /// A head lock attempt failed because the foreground held it.
    fn head_busy(&self);

    /// A head was locked but its cooldown had not elapsed.
    fn head_cooling(&self);

    /// A consolidation pass on one head succeeded.
    fn head_consolidated(&self, lsns_applied: u64);

    /// Overflow segments freed and store images deleted by one pass.
    fn reclaimed(&self, segments: u64, images: u64);

    /// A consolidation pass on one head failed and was abandoned.
    fn replay_failed(&self);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopMetrics;

impl VacuumMetrics for NoopMetrics {
    fn bucket_pass_completed(&self) {}
    fn bucket_pass_skipped(&self, _reason: &'static str) {}
    fn head_busy(&self) {}
    fn head_cooling(&self) {}
    fn head_consolidated(&self, _lsns_applied: u64) {}
    fn reclaimed(&self, _segments: u64, _images: u64) {}
    fn replay_failed(&self) {}
}

/// Atomic counters for every [`VacuumMetrics`] event.
#[derive(Default)]
pub struct CounterMetrics {
    /// Bucket passes that ran to completion.
    pub bucket_passes: AtomicU64,
    /// Buckets skipped because another worker held the latch.
    pub buckets_busy: AtomicU64,
    /// Buckets skipped because of the bucket cooldown.
    pub buckets_cooling: AtomicU64,
    /// Passes abandoned because the structural lock was contended.
    pub buckets_interrupted: AtomicU64,
    /// Heads skipped because the head lock was held.
    pub heads_busy: AtomicU64,
    /// Heads skipped because of the head cooldown.
    pub heads_cooling: AtomicU64,
    /// Successful consolidation passes.
    pub heads_consolidated: AtomicU64,
    /// Redo records folded into new images.
    pub lsns_applied: AtomicU64,
    /// Overflow segments freed.
    pub segments_reclaimed: AtomicU64,
    /// Store deletions issued.
    pub images_deleted: AtomicU64,
    /// Failed consolidation passes.
    pub replay_failures: AtomicU64,
}

/// Plain copy of [`CounterMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Bucket passes that ran to completion.
    pub bucket_passes: u64,
    /// Buckets skipped because another worker held the latch.
    pub buckets_busy: u64,
    /// Buckets skipped because of the bucket cooldown.
    pub buckets_cooling: u64,
    /// Passes abandoned because the structural lock was contended.
    pub buckets_interrupted: u64,
    /// Heads skipped because the head lock was held.
    pub heads_busy: u64,
    /// Heads skipped because of the head cooldown.
    pub heads_cooling: u64,
    /// Successful consolidation passes.
    pub heads_consolidated: u64,
    /// Redo records folded into new images.
    pub lsns_applied: u64,
    /// Overflow segments freed.
    pub segments_reclaimed: u64,
    /// Store deletions issued.
    pub images_deleted: u64,
    /// Failed consolidation passes.
    pub replay_failures: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CounterSnapshot {
            bucket_passes: load(&self.bucket_passes),
            buckets_busy: load(&self.buckets_busy),
            buckets_cooling: load(&self.buckets_cooling),
            buckets_interrupted: load(&self.buckets_interrupted),
            heads_busy: load(&self.heads_busy),
            heads_cooling: load(&self.heads_cooling),
            heads_consolidated: load(&self.heads_consolidated),
            lsns_applied: load(&self.lsns_applied),
            segments_reclaimed: load(&self.segments_reclaimed),
            images_deleted: load(&self.images_deleted),
            replay_failures: load(&self.replay_failures),
        }
    }
}

impl VacuumMetrics for CounterMetrics {
    fn bucket_pass_completed(&self) {
        self.bucket_passes.fetch_add(1, Ordering::Relaxed);
    }

    fn bucket_pass_skipped(&self, reason: &'static str) {
        match reason {
            "busy" => {
                self.buckets_busy.fetch_add(1, Ordering::Relaxed);
            }
            "cooldown" => {
                self.buckets_cooling.fetch_add(1, Ordering::Relaxed);
            }
            "interrupted" => {
                self.buckets_interrupted.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn head_busy(&self) {
        self.heads_busy.fetch_add(1, Ordering::Relaxed);
    }

    fn head_cooling(&self) {
        self.heads_cooling.fetch_add(1, Ordering::Relaxed);
    }

    fn head_consolidated(&self, lsns_applied: u64) {
        self.heads_consolidated.fetch_add(1, Ordering::Relaxed);
        self.lsns_applied.fetch_add(lsns_applied, Ordering::Relaxed);
    }

    fn reclaimed(&self, segments: u64, images: u64) {
        self.segments_reclaimed
            .fetch_add(segments, Ordering::Relaxed);
        self.images_deleted.fetch_add(images, Ordering::Relaxed);
    }

    fn replay_failed(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the metrics sink used when none is configured.
pub fn default_metrics() -> Arc<dyn VacuumMetrics> {
    Arc::new(NoopMetrics)
}
