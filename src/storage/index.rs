use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::primitives::concurrency::{CooldownStamp, TryLatch};
use crate::storage::chain::{Head, PendingSnapshot};
use crate::types::{LogIndexError, Lsn, PageKey, Result};

/// Heads snapshotted per structural-lock hold during a vacuum pass.
pub const DEFAULT_HEAD_BATCH: usize = 10;

/// Stack-local batch of head references taken under the structural lock.
pub type HeadBatch = SmallVec<[Arc<Head>; DEFAULT_HEAD_BATCH]>;

const BUCKET_HASH_SEED: u64 = 0;

/// One partition of the index.
#[derive(Default)]
pub struct Bucket {
    heads: RwLock<Vec<Arc<Head>>>,
    vacuum_latch: TryLatch,
    last_vacuum: CooldownStamp,
}

impl Bucket {
    /// Latch serializing vacuum passes over this bucket.
    pub fn vacuum_latch(&self) -> &TryLatch {
        &self.vacuum_latch
    }

    /// Completion time of the last full vacuum pass.
    pub fn last_vacuum(&self) -> &CooldownStamp {
        &self.last_vacuum
    }

    /// Number of heads, taking the shared structural lock.
    pub fn len(&self) -> usize {
        self.heads.read().len()
    }

    /// Returns true when the bucket holds no heads.
    pub fn is_empty(&self) -> bool {
        self.heads.read().is_empty()
    }

    /// Copies up to `limit` heads after skipping the first `skip`, without
    /// blocking. Returns `None` if a writer holds the structural lock.
    pub fn try_snapshot(&self, skip: usize, limit: usize) -> Option<HeadBatch> {
        let heads = self.heads.try_read()?;
        Some(heads.iter().skip(skip).take(limit).cloned().collect())
    }

    fn find(&self, key: &PageKey) -> Option<Arc<Head>> {
        self.heads
            .read()
            .iter()
            .find(|head| head.key() == key)
            .cloned()
    }

    fn find_or_insert(&self, key: &PageKey) -> Arc<Head> {
        if let Some(head) = self.find(key) {
            return head;
        }
        let mut heads = self.heads.write();
        if let Some(head) = heads.iter().find(|head| head.key() == key) {
            return Arc::clone(head);
        }
        let head = Arc::new(Head::new(*key));
        heads.push(Arc::clone(&head));
        trace!(page = %key, heads = heads.len(), "logindex.index.head_inserted");
        head
    }

    /// Keeps the relative order of the remaining heads. A vacuum pass that
    /// already visited the removed slot misses one head until its next pass.
    fn remove(&self, key: &PageKey) -> Option<Arc<Head>> {
        let mut heads = self.heads.write();
        let pos = heads.iter().position(|head| head.key() == key)?;
        Some(heads.remove(pos))
    }
}

/// Fixed array of buckets holding one [`Head`] per page with pending redo.
pub struct HashIndex {
    buckets: Box<[Bucket]>,
}

impl HashIndex {
    /// Creates an index with `bucket_count` partitions.
    pub fn new(bucket_count: usize) -> Result<Self> {
        if bucket_count == 0 {
            return Err(LogIndexError::Invalid("bucket count must be positive"));
        }
        let buckets = (0..bucket_count).map(|_| Bucket::default()).collect();
        Ok(Self { buckets })
    }

    /// Number of partitions.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Partition owning `key`. Stable across runs.
    pub fn bucket_of(&self, key: &PageKey) -> usize {
        (xxh64(&key.to_bytes(), BUCKET_HASH_SEED) % self.buckets.len() as u64) as usize
    }

    /// Returns bucket `idx`, or `None` when out of range.
    pub fn bucket(&self, idx: usize) -> Option<&Bucket> {
        self.buckets.get(idx)
    }

    /// Returns bucket `idx` modulo the bucket count.
    pub fn bucket_wrapping(&self, idx: usize) -> &Bucket {
        &self.buckets[idx % self.buckets.len()]
    }

    /// Foreground append: records `lsn` as pending for `key`, creating the
    /// head if needed. Blocks on the head lock.
    pub fn append(&self, key: PageKey, lsn: Lsn) -> Result<Arc<Head>> {
        let head = self.buckets[self.bucket_of(&key)].find_or_insert(&key);
        head.write().push_pending(lsn)?;
        Ok(head)
    }

    /// Looks up the head for `key`.
    pub fn get(&self, key: &PageKey) -> Option<Arc<Head>> {
        self.buckets[self.bucket_of(key)].find(key)
    }

    /// Replayed marker and pending LSNs for `key`.
    pub fn pending(&self, key: &PageKey) -> Option<PendingSnapshot> {
        self.get(key).map(|head| head.snapshot())
    }

    /// Unlinks the head for `key` from its bucket.
    ///
    /// Vacuum workers already holding the `Arc` finish their pass against
    /// the detached head.
    pub fn remove(&self, key: &PageKey) -> Option<Arc<Head>> {
        self.buckets[self.bucket_of(key)].remove(key)
    }

    /// Total heads across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    /// Returns true when no bucket holds a head.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }
}
