//! Background scheduler driving consolidation across the index.
//!
//! Workers walk the buckets round-robin. A bucket pass never blocks the
//! foreground: the bucket latch, the structural lock and every head lock are
//! only ever *tried*, and a failed attempt skips the unit of work until a
//! later tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::primitives::concurrency::now_millis;
use crate::storage::backend::Collaborators;
use crate::storage::chain::Head;
use crate::storage::index::HashIndex;
use crate::storage::metrics::{default_metrics, VacuumMetrics};
use crate::storage::options::VacuumCfg;
use crate::storage::replay::{self, ReplayReport};
use crate::types::{LogIndexError, Result};

/// Counters for one bucket pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketVacuumStats {
    /// Heads visited.
    pub heads_seen: u64,
    /// Heads skipped because the head lock was held.
    pub heads_busy: u64,
    /// Heads skipped because of the head cooldown.
    pub heads_cooling: u64,
    /// Heads whose consolidation pass succeeded.
    pub heads_replayed: u64,
    /// Heads whose consolidation pass failed.
    pub heads_failed: u64,
    /// Redo records folded into new images.
    pub lsns_applied: u64,
    /// Overflow segments freed.
    pub segments_reclaimed: u64,
    /// Store deletions issued.
    pub images_deleted: u64,
    /// Wall time spent in the pass.
    pub run_millis: u64,
}

impl BucketVacuumStats {
    /// Returns true when the pass changed any head.
    pub fn made_progress(&self) -> bool {
        self.lsns_applied > 0 || self.segments_reclaimed > 0 || self.images_deleted > 0
    }

    fn record(&mut self, visit: &HeadVisit) {
        self.heads_seen += 1;
        match visit {
            HeadVisit::Busy => self.heads_busy += 1,
            HeadVisit::CoolingDown => self.heads_cooling += 1,
            HeadVisit::Replayed(report) => {
                self.heads_replayed += 1;
                self.lsns_applied += report.outcome.lsns_applied() as u64;
                self.segments_reclaimed += report.segments_reclaimed as u64;
                self.images_deleted += report.images_deleted as u64;
            }
            HeadVisit::Failed(_) => self.heads_failed += 1,
        }
    }
}

/// Result of [`Vacuumer::vacuum_bucket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketPass {
    /// Another worker holds the bucket latch.
    Busy,
    /// The bucket was fully vacuumed too recently.
    CoolingDown,
    /// Every head was visited; the bucket cooldown was stamped.
    Completed(BucketVacuumStats),
    /// The structural lock was contended mid-pass. The bucket stays due.
    Interrupted(BucketVacuumStats),
}

/// Result of visiting one head.
#[derive(Debug)]
pub enum HeadVisit {
    /// The foreground held the head lock.
    Busy,
    /// The head was consolidated too recently.
    CoolingDown,
    /// Consolidation ran.
    Replayed(ReplayReport),
    /// Consolidation failed; the head is retried after its cooldown.
    Failed(LogIndexError),
}

/// Owns everything a worker needs to vacuum the index.
pub struct Vacuumer {
    index: Arc<HashIndex>,
    deps: Collaborators,
    cfg: VacuumCfg,
    metrics: Arc<dyn VacuumMetrics>,
}

impl Vacuumer {
    /// Validates `cfg` and builds a vacuumer over `index`.
    pub fn new(index: Arc<HashIndex>, deps: Collaborators, cfg: VacuumCfg) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            index,
            deps,
            cfg,
            metrics: default_metrics(),
        })
    }

    /// Replaces the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn VacuumMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Index being vacuumed.
    pub fn index(&self) -> &Arc<HashIndex> {
        &self.index
    }

    /// Active configuration.
    pub fn config(&self) -> &VacuumCfg {
        &self.cfg
    }

    /// Runs one pass over bucket `bucket_idx` (taken modulo the bucket count).
    pub fn vacuum_bucket(&self, bucket_idx: usize, now_ms: u64) -> BucketPass {
        let bucket_idx = bucket_idx % self.index.bucket_count();
        let bucket = self.index.bucket_wrapping(bucket_idx);
        let Some(_latch) = bucket.vacuum_latch().try_acquire() else {
            self.metrics.bucket_pass_skipped("busy");
            return BucketPass::Busy;
        };
        if !bucket
            .last_vacuum()
            .is_due(now_ms, self.cfg.bucket_cooldown)
        {
            self.metrics.bucket_pass_skipped("cooldown");
            return BucketPass::CoolingDown;
        }

        let started = Instant::now();
        let mut stats = BucketVacuumStats::default();
        let mut processed = 0usize;
        loop {
            let Some(batch) = bucket.try_snapshot(processed, self.cfg.batch_size) else {
                stats.run_millis = elapsed_millis(started);
                debug!(
                    bucket = bucket_idx,
                    processed,
                    "logindex.vacuum.bucket_interrupted"
                );
                self.metrics.bucket_pass_skipped("interrupted");
                return BucketPass::Interrupted(stats);
            };
            for head in &batch {
                let visit = self.vacuum_head(head, now_ms);
                stats.record(&visit);
            }
            processed += batch.len();
            if batch.len() < self.cfg.batch_size {
                break;
            }
        }

        stats.run_millis = elapsed_millis(started);
        bucket
            .last_vacuum()
            .stamp(now_ms.saturating_add(stats.run_millis));
        self.metrics.bucket_pass_completed();
        log_bucket_stats(bucket_idx, &stats);
        BucketPass::Completed(stats)
    }

    /// Consolidates one head if its lock is free and its cooldown elapsed.
    pub fn vacuum_head(&self, head: &Head, now_ms: u64) -> HeadVisit {
        let Some(mut state) = head.try_write() else {
            self.metrics.head_busy();
            return HeadVisit::Busy;
        };
        if !head.last_vacuum().is_due(now_ms, self.cfg.head_cooldown) {
            self.metrics.head_cooling();
            return HeadVisit::CoolingDown;
        }
        let result = replay::consolidate(
            head.key(),
            &mut state,
            &self.deps,
            self.cfg.max_replay_versions,
        );
        head.last_vacuum().stamp(now_ms);
        drop(state);

        match result {
            Ok(report) => {
                self.metrics
                    .head_consolidated(report.outcome.lsns_applied() as u64);
                if report.segments_reclaimed > 0 || report.images_deleted > 0 {
                    self.metrics.reclaimed(
                        report.segments_reclaimed as u64,
                        report.images_deleted as u64,
                    );
                }
                HeadVisit::Replayed(report)
            }
            Err(err) => {
                if matches!(err, LogIndexError::MissingImage { .. }) {
                    error!(page = %head.key(), error = %err, "logindex.vacuum.image_lost");
                } else {
                    warn!(page = %head.key(), error = %err, "logindex.vacuum.replay_failed");
                }
                self.metrics.replay_failed();
                HeadVisit::Failed(err)
            }
        }
    }

    /// Worker loop: sleeps a tick, moves to the next bucket and vacuums it,
    /// until `shutdown` is raised.
    pub fn run_worker(&self, worker_id: usize, shutdown: &AtomicBool) {
        let buckets = self.index.bucket_count();
        let mut cursor = worker_id % buckets;
        info!(worker = worker_id, start = cursor, "logindex.vacuum.worker_started");
        while !shutdown.load(Ordering::Acquire) {
            thread::sleep(self.cfg.tick_interval);
            cursor = (cursor + 1) % buckets;
            let pass = self.vacuum_bucket(cursor, now_millis());
            trace!(worker = worker_id, bucket = cursor, ?pass, "logindex.vacuum.tick");
        }
        info!(worker = worker_id, "logindex.vacuum.worker_stopped");
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

fn log_bucket_stats(bucket: usize, stats: &BucketVacuumStats) {
    if stats.made_progress() {
        info!(
            bucket,
            run_millis = stats.run_millis,
            heads = stats.heads_seen,
            replayed = stats.heads_replayed,
            failed = stats.heads_failed,
            lsns = stats.lsns_applied,
            segments = stats.segments_reclaimed,
            images = stats.images_deleted,
            "logindex.vacuum.bucket_completed"
        );
    } else {
        debug!(
            bucket,
            run_millis = stats.run_millis,
            heads = stats.heads_seen,
            busy = stats.heads_busy,
            cooling = stats.heads_cooling,
            failed = stats.heads_failed,
            "logindex.vacuum.bucket_idle"
        );
    }
}

/// Set of worker threads sharing one [`Vacuumer`].
///
/// Dropping the daemon stops and joins the workers.
pub struct VacuumDaemon {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl VacuumDaemon {
    /// Starts `cfg.workers` named threads.
    pub fn spawn(vacuumer: Arc<Vacuumer>) -> Result<Self> {
        let mut daemon = Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::with_capacity(vacuumer.cfg.workers),
        };
        for worker_id in 0..vacuumer.cfg.workers {
            let vacuumer = Arc::clone(&vacuumer);
            let shutdown = Arc::clone(&daemon.shutdown);
            let handle = thread::Builder::new()
                .name(format!("logindex-vacuum-{worker_id}"))
                .spawn(move || vacuumer.run_worker(worker_id, &shutdown))?;
            daemon.workers.push(handle);
        }
        Ok(daemon)
    }

    /// Number of running workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Raises the shutdown flag and joins every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("logindex.vacuum.worker_panicked");
            }
        }
    }
}

impl Drop for VacuumDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}
