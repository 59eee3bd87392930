//! In-memory gallery store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. A transaction holds the store's lock for its
//! whole lifetime and works on a staged copy of the parent's images, which
//! replaces the live rows only on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::storage::backend::validate_segment;

use super::store::{GalleryStore, GalleryTx, ImageRecord, NewImage, ParentRecord, ParentRegistry};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    parents: HashMap<String, ParentRecord>,
    images: HashMap<String, BTreeMap<i64, ImageRecord>>,
}

/// Gallery store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryGalleryStore {
    inner: Mutex<Inner>,
    fail_commits: AtomicBool,
}

impl MemoryGalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parent (idempotent). An existing parent keeps its scope.
    ///
    /// Both ids become blob directory names, so each must be a valid
    /// storage path segment.
    pub fn register_parent(&self, parent_id: &str, scope_id: &str) -> anyhow::Result<ParentRecord> {
        validate_segment("parent", parent_id)?;
        validate_segment("scope", scope_id)?;
        let mut inner = self.lock()?;
        let record = inner
            .parents
            .entry(parent_id.to_string())
            .or_insert_with(|| ParentRecord {
                id: parent_id.to_string(),
                scope_id: scope_id.to_string(),
                created_at: super::store::now_rfc3339(),
            });
        Ok(record.clone())
    }

    /// Make every subsequent commit fail (and roll back) until reset.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }
}

fn sorted(images: &BTreeMap<i64, ImageRecord>) -> Vec<ImageRecord> {
    let mut list: Vec<ImageRecord> = images.values().cloned().collect();
    list.sort_by_key(|r| (r.sort_order, r.id));
    list
}

/// Write transaction over a staged copy of one parent's images.
pub struct MemoryGalleryTx<'a> {
    inner: MutexGuard<'a, Inner>,
    fail_commit: bool,
    parent_id: String,
    staged: BTreeMap<i64, ImageRecord>,
    next_id: i64,
}

impl MemoryGalleryTx<'_> {
    fn entry(&mut self, image_id: i64) -> anyhow::Result<&mut ImageRecord> {
        let parent_id = &self.parent_id;
        self.staged
            .get_mut(&image_id)
            .ok_or_else(|| anyhow::anyhow!("image {image_id} does not belong to parent {parent_id}"))
    }
}

impl GalleryTx for MemoryGalleryTx<'_> {
    fn count(&mut self) -> anyhow::Result<u32> {
        Ok(u32::try_from(self.staged.len())?)
    }

    fn next_order(&mut self) -> anyhow::Result<u32> {
        Ok(self
            .staged
            .values()
            .map(|r| r.sort_order + 1)
            .max()
            .unwrap_or(0))
    }

    fn has_cover(&mut self) -> anyhow::Result<bool> {
        Ok(self.staged.values().any(|r| r.is_cover))
    }

    fn list(&mut self) -> anyhow::Result<Vec<ImageRecord>> {
        Ok(sorted(&self.staged))
    }

    fn get(&mut self, image_id: i64) -> anyhow::Result<Option<ImageRecord>> {
        Ok(self.staged.get(&image_id).cloned())
    }

    fn insert(&mut self, image: NewImage) -> anyhow::Result<ImageRecord> {
        self.next_id += 1;
        let record = ImageRecord {
            id: self.next_id,
            parent_id: self.parent_id.clone(),
            url: image.url,
            storage_key: image.storage_key,
            is_cover: image.is_cover,
            sort_order: image.sort_order,
            created_at: image.created_at,
        };
        self.staged.insert(record.id, record.clone());
        Ok(record)
    }

    fn set_sort_order(&mut self, image_id: i64, sort_order: u32) -> anyhow::Result<()> {
        self.entry(image_id)?.sort_order = sort_order;
        Ok(())
    }

    fn assign_exclusive_cover(&mut self, image_id: i64) -> anyhow::Result<()> {
        self.entry(image_id)?;
        for record in self.staged.values_mut() {
            record.is_cover = record.id == image_id;
        }
        Ok(())
    }

    fn delete(&mut self, image_id: i64) -> anyhow::Result<()> {
        self.staged.remove(&image_id);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        if self.fail_commit {
            anyhow::bail!("injected commit failure");
        }
        let staged = std::mem::take(&mut self.staged);
        let parent_id = self.parent_id.clone();
        self.inner.next_id = self.next_id;
        if staged.is_empty() {
            self.inner.images.remove(&parent_id);
        } else {
            self.inner.images.insert(parent_id, staged);
        }
        Ok(())
    }
}

impl GalleryStore for MemoryGalleryStore {
    fn begin<'a>(&'a self, parent_id: &str) -> anyhow::Result<Box<dyn GalleryTx + 'a>> {
        let inner = self.lock()?;
        let staged = inner.images.get(parent_id).cloned().unwrap_or_default();
        let next_id = inner.next_id;
        Ok(Box::new(MemoryGalleryTx {
            inner,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
            parent_id: parent_id.to_string(),
            staged,
            next_id,
        }))
    }

    fn list_images(&self, parent_id: &str) -> anyhow::Result<Vec<ImageRecord>> {
        let inner = self.lock()?;
        Ok(inner.images.get(parent_id).map(sorted).unwrap_or_default())
    }

    fn gallery_parent_ids(&self) -> anyhow::Result<Vec<String>> {
        let inner = self.lock()?;
        let mut ids: Vec<String> = inner.images.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl ParentRegistry for MemoryGalleryStore {
    fn fetch(&self, parent_id: &str) -> anyhow::Result<Option<ParentRecord>> {
        Ok(self.lock()?.parents.get(parent_id).cloned())
    }
}
