use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::types::{Lsn, PageKey, Result};

/// Durable key-value store holding consolidated page images keyed by
/// `(page, version marker)`.
///
/// Each call is atomic on its own key; nothing here spans keys.
pub trait VersionStore: Send + Sync {
    /// Returns the image stored at exactly `marker`, if any.
    fn lookup(&self, key: &PageKey, marker: Lsn) -> Result<Option<Bytes>>;
    /// Inserts or overwrites the image at `marker`.
    fn put(&self, key: &PageKey, marker: Lsn, image: Bytes) -> Result<()>;
    /// Removes the image at `marker`; absent markers are not an error.
    fn delete(&self, key: &PageKey, marker: Lsn) -> Result<()>;
}

/// Applies redo records to page images.
pub trait RedoEngine: Send + Sync {
    /// Replays `lsns` in order on top of `base` and returns the resulting image.
    fn apply(&self, key: &PageKey, lsns: &[Lsn], base: Bytes) -> Result<Bytes>;
    /// Builds a page from a creation-class record with no prior image.
    fn synthesize(&self, key: &PageKey, lsn: Lsn) -> Result<Bytes>;
}

/// Source-of-record files, consulted when the version store has no base.
pub trait SourceOfRecord: Send + Sync {
    /// Returns whether the page's relation fork exists at all.
    fn relation_exists(&self, key: &PageKey) -> Result<bool>;
    /// Reads the authoritative page image directly from the relation file.
    fn fetch_base(&self, key: &PageKey) -> Result<Bytes>;
}

/// External services the consolidation pass depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Consolidated image store.
    pub store: Arc<dyn VersionStore>,
    /// Redo apply engine.
    pub redo: Arc<dyn RedoEngine>,
    /// Relation files.
    pub source: Arc<dyn SourceOfRecord>,
}

impl Collaborators {
    /// Bundles the three collaborators.
    pub fn new(
        store: Arc<dyn VersionStore>,
        redo: Arc<dyn RedoEngine>,
        source: Arc<dyn SourceOfRecord>,
    ) -> Self {
        Self {
            store,
            redo,
            source,
        }
    }
}

/// Process-local [`VersionStore`] backed by a hash map.
#[derive(Default)]
pub struct MemoryVersionStore {
    images: Mutex<HashMap<(PageKey, Lsn), Bytes>>,
}

impl MemoryVersionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether an image is stored at `marker`.
    pub fn contains(&self, key: &PageKey, marker: Lsn) -> bool {
        self.images.lock().contains_key(&(*key, marker))
    }

    /// Returns every marker stored for `key`, ascending.
    pub fn markers(&self, key: &PageKey) -> Vec<Lsn> {
        let mut markers: Vec<Lsn> = self
            .images
            .lock()
            .keys()
            .filter(|(page, _)| page == key)
            .map(|(_, marker)| *marker)
            .collect();
        markers.sort_unstable();
        markers
    }

    /// Total number of stored images.
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}

impl VersionStore for MemoryVersionStore {
    fn lookup(&self, key: &PageKey, marker: Lsn) -> Result<Option<Bytes>> {
        Ok(self.images.lock().get(&(*key, marker)).cloned())
    }

    fn put(&self, key: &PageKey, marker: Lsn, image: Bytes) -> Result<()> {
        self.images.lock().insert((*key, marker), image);
        Ok(())
    }

    fn delete(&self, key: &PageKey, marker: Lsn) -> Result<()> {
        self.images.lock().remove(&(*key, marker));
        Ok(())
    }
}
