//! The gallery manager: upload, delete, set-cover and reorder.
//!
//! Each mutation runs its whole read-modify-write inside one
//! [`GalleryTx`], which the stores serialize per database, so concurrent
//! calls against the same parent never compute the same `next_order` or
//! promote two covers.  Blobs are written before their rows are inserted:
//! a file without a row is harmless, a row without a file is not.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::order::{plan_ranks, requested_orders, ReorderItem};
use super::GalleryOptions;
use crate::errors::GalleryError;
use crate::metadata::store::{
    now_rfc3339, GalleryStore, GalleryTx, ImageRecord, NewImage, ParentRecord, ParentRegistry,
};
use crate::metrics::{
    record_operation, BLOB_DELETE_FAILURES_TOTAL, IMAGES_TRUNCATED_TOTAL, IMAGES_UPLOADED_TOTAL,
};
use crate::storage::backend::{detect_media_type, BlobStore};
use crate::storage::input::FileInput;

/// Result of [`GalleryManager::delete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeleteOutcome {
    /// The removed image.
    pub deleted_id: i64,
    /// The image promoted to cover, when the deleted image was the cover
    /// and others remain.
    pub new_cover_id: Option<i64>,
    /// Whether the blob was physically removed. Informational only.
    pub blob_removed: bool,
}

/// Orchestrates gallery mutations over a [`GalleryStore`] and a [`BlobStore`].
pub struct GalleryManager {
    store: Arc<dyn GalleryStore>,
    parents: Arc<dyn ParentRegistry>,
    blobs: Arc<dyn BlobStore>,
    options: GalleryOptions,
}

impl GalleryManager {
    pub fn new(
        store: Arc<dyn GalleryStore>,
        parents: Arc<dyn ParentRegistry>,
        blobs: Arc<dyn BlobStore>,
        options: GalleryOptions,
    ) -> Self {
        Self {
            store,
            parents,
            blobs,
            options,
        }
    }

    fn parent(&self, parent_id: &str) -> Result<ParentRecord, GalleryError> {
        self.parents
            .fetch(parent_id)?
            .ok_or_else(|| GalleryError::parent_not_found(parent_id))
    }

    // -- Upload ---------------------------------------------------------------

    /// Store a batch of files and append them to the parent's gallery.
    ///
    /// Files beyond the parent's free capacity are dropped silently. Every
    /// accepted file either ends up with a committed record or the whole
    /// call fails; blobs written before a failure are left on disk.
    ///
    /// Returns the created records in input order.
    pub fn upload(
        &self,
        parent_id: &str,
        files: Vec<Box<dyn FileInput>>,
    ) -> Result<Vec<ImageRecord>, GalleryError> {
        let result = self.upload_inner(parent_id, files);
        record_operation("upload", result.is_ok());
        result
    }

    fn upload_inner(
        &self,
        parent_id: &str,
        mut files: Vec<Box<dyn FileInput>>,
    ) -> Result<Vec<ImageRecord>, GalleryError> {
        let parent = self.parent(parent_id)?;
        if files.is_empty() {
            return Err(GalleryError::invalid("no files were submitted"));
        }
        if files.len() > self.options.max_files_per_request {
            return Err(GalleryError::LimitExceeded {
                limit: self.options.max_files_per_request,
                submitted: files.len(),
            });
        }

        let mut tx = self.store.begin(parent_id)?;
        let capacity = self.options.max_images_per_parent;
        let count = tx.count()?;
        if count >= capacity {
            return Err(GalleryError::CapacityExceeded {
                parent_id: parent_id.to_string(),
                capacity,
            });
        }

        let remaining = (capacity - count) as usize;
        if files.len() > remaining {
            let dropped = files.len() - remaining;
            debug!(parent_id, count, dropped, "truncating upload batch to free capacity");
            metrics::counter!(IMAGES_TRUNCATED_TOTAL).increment(dropped as u64);
            files.truncate(remaining);
        }

        // Reject the batch before anything touches the blob store.
        for file in &files {
            detect_media_type(file.as_ref())?;
        }

        let mut written = Vec::with_capacity(files.len());
        let result = self.write_batch(tx.as_mut(), &parent, &mut files, &mut written);
        let created = match result.and_then(|created| {
            tx.commit()?;
            Ok(created)
        }) {
            Ok(created) => created,
            Err(e) => {
                if !written.is_empty() {
                    warn!(
                        parent_id,
                        orphaned = ?written,
                        "upload failed after writing blobs; leaving them in place: {e}"
                    );
                }
                return Err(e);
            }
        };

        metrics::counter!(IMAGES_UPLOADED_TOTAL).increment(created.len() as u64);
        info!(
            parent_id,
            uploaded = created.len(),
            cover_assigned = created.first().is_some_and(|r| r.is_cover),
            "images uploaded"
        );
        Ok(created)
    }

    /// Save each file, then insert its row. `written` collects the storage
    /// keys of blobs already on disk.
    fn write_batch(
        &self,
        tx: &mut (dyn GalleryTx + '_),
        parent: &ParentRecord,
        files: &mut [Box<dyn FileInput>],
        written: &mut Vec<String>,
    ) -> Result<Vec<ImageRecord>, GalleryError> {
        let next_order = tx.next_order()?;
        let had_cover = tx.has_cover()?;

        let mut created = Vec::with_capacity(files.len());
        for (index, file) in files.iter_mut().enumerate() {
            let saved = self
                .blobs
                .save(&parent.scope_id, &parent.id, index, file.as_mut())?;
            written.push(saved.storage_key.clone());

            let record = tx.insert(NewImage {
                url: self.options.image_url(&parent.id, &saved.filename),
                storage_key: saved.storage_key,
                is_cover: index == 0 && !had_cover,
                sort_order: next_order + index as u32,
                created_at: now_rfc3339(),
            })?;
            created.push(record);
        }
        Ok(created)
    }

    // -- Delete ---------------------------------------------------------------

    /// Remove an image, promote a new cover if needed and close the gap in
    /// the ordering. The blob is removed after commit, best-effort.
    pub fn delete(&self, parent_id: &str, image_id: i64) -> Result<DeleteOutcome, GalleryError> {
        let result = self.delete_inner(parent_id, image_id);
        record_operation("delete", result.is_ok());
        result
    }

    fn delete_inner(&self, parent_id: &str, image_id: i64) -> Result<DeleteOutcome, GalleryError> {
        let mut tx = self.store.begin(parent_id)?;
        let target = tx
            .get(image_id)?
            .ok_or_else(|| GalleryError::image_not_found(image_id))?;

        tx.delete(image_id)?;
        let remaining = tx.list()?;

        let mut new_cover_id = None;
        if target.is_cover {
            if let Some(first) = remaining.first() {
                tx.assign_exclusive_cover(first.id)?;
                new_cover_id = Some(first.id);
            }
        }

        let changes = plan_ranks(&remaining, |r| u64::from(r.sort_order));
        for &(id, rank) in &changes {
            tx.set_sort_order(id, rank)?;
        }
        tx.commit()?;

        info!(
            parent_id,
            image_id,
            new_cover_id = ?new_cover_id,
            renumbered = changes.len(),
            "image deleted"
        );

        let blob_removed = self.blobs.delete(&target.storage_key);
        if !blob_removed {
            metrics::counter!(BLOB_DELETE_FAILURES_TOTAL).increment(1);
            warn!(
                parent_id,
                image_id,
                storage_key = %target.storage_key,
                "blob not removed; metadata deletion stands"
            );
        }

        Ok(DeleteOutcome {
            deleted_id: image_id,
            new_cover_id,
            blob_removed,
        })
    }

    // -- Set cover ------------------------------------------------------------

    /// Make `image_id` the parent's only cover.
    pub fn set_cover(&self, parent_id: &str, image_id: i64) -> Result<ImageRecord, GalleryError> {
        let result = self.set_cover_inner(parent_id, image_id);
        record_operation("set_cover", result.is_ok());
        result
    }

    fn set_cover_inner(&self, parent_id: &str, image_id: i64) -> Result<ImageRecord, GalleryError> {
        let mut tx = self.store.begin(parent_id)?;
        if tx.get(image_id)?.is_none() {
            return Err(GalleryError::image_not_found(image_id));
        }

        tx.assign_exclusive_cover(image_id)?;
        let record = tx
            .get(image_id)?
            .ok_or_else(|| GalleryError::image_not_found(image_id))?;
        tx.commit()?;

        info!(parent_id, image_id, "cover assigned");
        Ok(record)
    }

    // -- Reorder --------------------------------------------------------------

    /// Apply requested positions and renumber the gallery to `0..n`.
    ///
    /// Ids that do not belong to the parent are ignored. Returns the number
    /// of images the parent has.
    pub fn reorder(&self, parent_id: &str, items: &[ReorderItem]) -> Result<usize, GalleryError> {
        let result = self.reorder_inner(parent_id, items);
        record_operation("reorder", result.is_ok());
        result
    }

    fn reorder_inner(&self, parent_id: &str, items: &[ReorderItem]) -> Result<usize, GalleryError> {
        let requested = requested_orders(items)?;

        let mut tx = self.store.begin(parent_id)?;
        let current = tx.list()?;
        let ignored = requested
            .keys()
            .filter(|id| !current.iter().any(|r| r.id == **id))
            .count();

        let changes = plan_ranks(&current, |r| {
            requested
                .get(&r.id)
                .copied()
                .unwrap_or(u64::from(r.sort_order))
        });
        for &(id, rank) in &changes {
            tx.set_sort_order(id, rank)?;
        }
        tx.commit()?;

        if ignored > 0 {
            debug!(parent_id, ignored, "reorder referenced unknown images");
        }
        info!(parent_id, moved = changes.len(), "gallery reordered");
        Ok(current.len())
    }

    // -- Read -----------------------------------------------------------------

    /// The parent's gallery in display order.
    pub fn list(&self, parent_id: &str) -> Result<Vec<ImageRecord>, GalleryError> {
        self.parent(parent_id)?;
        Ok(self.store.list_images(parent_id)?)
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryGalleryStore;
    use crate::metadata::sqlite::SqliteGalleryStore;
    use crate::storage::backend::SavedBlob;
    use crate::storage::input::MemoryFile;
    use crate::storage::local::LocalBlobStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PARENT: &str = "listing-1";

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryGalleryStore>,
        blobs: Arc<LocalBlobStore>,
        manager: GalleryManager,
    }

    fn harness_with(options: GalleryOptions) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGalleryStore::new());
        store.register_parent(PARENT, "org-1").unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path(), 8).unwrap());
        let manager = GalleryManager::new(store.clone(), store.clone(), blobs.clone(), options);
        Harness {
            _dir: dir,
            store,
            blobs,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(GalleryOptions::default())
    }

    fn jpg(name: &str) -> Box<dyn FileInput> {
        Box::new(MemoryFile::new(
            format!("{name}.jpg"),
            Some("image/jpeg"),
            format!("bytes of {name}").into_bytes(),
        ))
    }

    fn batch(names: &[&str]) -> Vec<Box<dyn FileInput>> {
        names.iter().map(|n| jpg(n)).collect()
    }

    fn seed(h: &Harness, n: usize) -> Vec<ImageRecord> {
        let mut all = Vec::new();
        for chunk in (0..n).collect::<Vec<_>>().chunks(10) {
            let files = chunk.iter().map(|i| jpg(&format!("seed{i}"))).collect();
            all.extend(h.manager.upload(PARENT, files).unwrap());
        }
        all
    }

    fn assert_invariants(store: &dyn GalleryStore, parent_id: &str) {
        let images = store.list_images(parent_id).unwrap();
        let covers = images.iter().filter(|r| r.is_cover).count();
        assert!(covers <= 1, "{covers} covers for {parent_id}");
        let orders: Vec<u32> = images.iter().map(|r| r.sort_order).collect();
        let expected: Vec<u32> = (0..images.len() as u32).collect();
        assert_eq!(orders, expected, "orders not dense for {parent_id}");
    }

    fn orders_by_id(store: &dyn GalleryStore) -> Vec<(i64, u32)> {
        let mut pairs: Vec<(i64, u32)> = store
            .list_images(PARENT)
            .unwrap()
            .iter()
            .map(|r| (r.id, r.sort_order))
            .collect();
        pairs.sort();
        pairs
    }

    fn cover_id(store: &dyn GalleryStore) -> Option<i64> {
        store
            .list_images(PARENT)
            .unwrap()
            .into_iter()
            .find(|r| r.is_cover)
            .map(|r| r.id)
    }

    // -- Upload / cover / delete flow ----------------------------------------

    #[test]
    fn test_upload_set_cover_delete_flow() {
        let h = harness();

        // First upload of three files.
        let created = h.manager.upload(PARENT, batch(&["f1", "f2", "f3"])).unwrap();
        assert_eq!(created.len(), 3);
        let (f1, f2, f3) = (created[0].id, created[1].id, created[2].id);
        assert!(created[0].is_cover);
        assert!(!created[1].is_cover && !created[2].is_cover);
        assert_eq!(
            created.iter().map(|r| r.sort_order).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(created[0].url.starts_with("/images/listing-1/"));
        assert!(created[0].url.ends_with(".jpg"));
        assert_invariants(h.store.as_ref(), PARENT);

        // Explicit cover.
        let updated = h.manager.set_cover(PARENT, f3).unwrap();
        assert!(updated.is_cover);
        assert_eq!(cover_id(h.store.as_ref()), Some(f3));
        assert_invariants(h.store.as_ref(), PARENT);

        // Deleting the cover promotes f1 and renumbers the rest.
        let outcome = h.manager.delete(PARENT, f3).unwrap();
        assert_eq!(outcome.deleted_id, f3);
        assert_eq!(outcome.new_cover_id, Some(f1));
        assert!(outcome.blob_removed);
        assert_eq!(orders_by_id(h.store.as_ref()), vec![(f1, 0), (f2, 1)]);
        assert_invariants(h.store.as_ref(), PARENT);
    }

    #[test]
    fn test_reorder_normalizes_out_of_range_order() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["f1", "f2"])).unwrap();
        let (f1, f2) = (created[0].id, created[1].id);

        let count = h
            .manager
            .reorder(PARENT, &[ReorderItem::new(f2, 0), ReorderItem::new(f1, 5)])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(orders_by_id(h.store.as_ref()), vec![(f1, 1), (f2, 0)]);
        assert_invariants(h.store.as_ref(), PARENT);
    }

    #[test]
    fn test_upload_truncates_to_last_slot() {
        let h = harness();
        seed(&h, 29);

        let created = h.manager.upload(PARENT, batch(&["g1", "g2"])).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].sort_order, 29);
        assert!(!created[0].is_cover);
        assert_eq!(h.store.list_images(PARENT).unwrap().len(), 30);
        assert_invariants(h.store.as_ref(), PARENT);
    }

    // -- Upload preconditions -------------------------------------------------

    #[test]
    fn test_upload_unknown_parent() {
        let h = harness();
        let err = h.manager.upload("ghost", batch(&["a"])).unwrap_err();
        assert!(matches!(err, GalleryError::NotFound { resource: "parent", .. }));
    }

    #[test]
    fn test_upload_empty_batch() {
        let h = harness();
        let err = h.manager.upload(PARENT, Vec::new()).unwrap_err();
        assert!(matches!(err, GalleryError::InvalidInput { .. }));
    }

    #[test]
    fn test_upload_too_many_files() {
        let h = harness();
        let names: Vec<String> = (0..11).map(|i| format!("f{i}")).collect();
        let files = names.iter().map(|n| jpg(n)).collect();
        let err = h.manager.upload(PARENT, files).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::LimitExceeded {
                limit: 10,
                submitted: 11
            }
        ));
    }

    #[test]
    fn test_upload_at_capacity() {
        let h = harness();
        seed(&h, 30);
        let err = h.manager.upload(PARENT, batch(&["late"])).unwrap_err();
        assert!(matches!(err, GalleryError::CapacityExceeded { capacity: 30, .. }));
    }

    #[test]
    fn test_upload_five_at_twenty_eight_accepts_two() {
        let h = harness();
        seed(&h, 28);
        let created = h
            .manager
            .upload(PARENT, batch(&["a", "b", "c", "d", "e"]))
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].sort_order, 28);
        assert_eq!(created[1].sort_order, 29);
        assert_invariants(h.store.as_ref(), PARENT);
    }

    #[test]
    fn test_limits_come_from_options() {
        let h = harness_with(GalleryOptions {
            max_files_per_request: 2,
            max_images_per_parent: 3,
            public_base_url: "https://img.example.com".to_string(),
        });
        assert!(matches!(
            h.manager.upload(PARENT, batch(&["a", "b", "c"])),
            Err(GalleryError::LimitExceeded { limit: 2, .. })
        ));
        h.manager.upload(PARENT, batch(&["a", "b"])).unwrap();
        let created = h.manager.upload(PARENT, batch(&["c", "d"])).unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].url.starts_with("https://img.example.com/listing-1/"));
    }

    #[test]
    fn test_second_batch_keeps_existing_cover() {
        let h = harness();
        let first = h.manager.upload(PARENT, batch(&["a", "b"])).unwrap();
        let second = h.manager.upload(PARENT, batch(&["c", "d"])).unwrap();
        assert!(second.iter().all(|r| !r.is_cover));
        assert_eq!(cover_id(h.store.as_ref()), Some(first[0].id));
        assert_eq!(
            second.iter().map(|r| r.sort_order).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn test_upload_assigns_cover_when_gallery_has_none() {
        let h = harness();
        let first = h.manager.upload(PARENT, batch(&["a"])).unwrap();
        h.manager.delete(PARENT, first[0].id).unwrap();

        let created = h.manager.upload(PARENT, batch(&["b", "c"])).unwrap();
        assert!(created[0].is_cover);
        assert_eq!(created[0].sort_order, 0);
    }

    #[test]
    fn test_unsupported_file_rejects_whole_batch_before_writing() {
        let h = harness();
        let mut files = batch(&["ok"]);
        files.push(Box::new(MemoryFile::new(
            "notes.txt",
            Some("text/plain"),
            b"hello".to_vec(),
        )));

        let err = h.manager.upload(PARENT, files).unwrap_err();
        assert!(matches!(err, GalleryError::UnsupportedMediaType { ref filename } if filename == "notes.txt"));
        assert!(h.store.list_images(PARENT).unwrap().is_empty());
        assert!(!h.blobs.root().join("org-1").exists());
    }

    #[test]
    fn test_blobs_written_under_scope_and_parent() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a"])).unwrap();
        let key = &created[0].storage_key;
        assert!(key.starts_with("org-1/listing-1/"));
        assert!(h.blobs.contains(key));
        assert!(h.blobs.root().join(key).is_file());
    }

    // -- Failure handling -----------------------------------------------------

    /// Blob store that fails the `fail_on`-th save.
    struct FlakyBlobs {
        inner: LocalBlobStore,
        fail_on: usize,
        saves: AtomicUsize,
    }

    impl BlobStore for FlakyBlobs {
        fn save(
            &self,
            scope_id: &str,
            parent_id: &str,
            batch_index: usize,
            file: &mut dyn FileInput,
        ) -> Result<SavedBlob, GalleryError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(anyhow::anyhow!("disk full").into());
            }
            self.inner.save(scope_id, parent_id, batch_index, file)
        }

        fn delete(&self, storage_key: &str) -> bool {
            self.inner.delete(storage_key)
        }

        fn contains(&self, storage_key: &str) -> bool {
            self.inner.contains(storage_key)
        }
    }

    #[test]
    fn test_failed_blob_save_creates_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGalleryStore::new());
        store.register_parent(PARENT, "org-1").unwrap();
        let blobs = Arc::new(FlakyBlobs {
            inner: LocalBlobStore::new(dir.path(), 8).unwrap(),
            fail_on: 1,
            saves: AtomicUsize::new(0),
        });
        let manager = GalleryManager::new(
            store.clone(),
            store.clone(),
            blobs,
            GalleryOptions::default(),
        );

        let err = manager.upload(PARENT, batch(&["a", "b", "c"])).unwrap_err();
        assert!(matches!(err, GalleryError::Internal(_)));
        assert!(store.list_images(PARENT).unwrap().is_empty());

        // The first blob stays behind as residue.
        let residue = std::fs::read_dir(dir.path().join("org-1").join(PARENT))
            .unwrap()
            .count();
        assert_eq!(residue, 1);
    }

    #[test]
    fn test_failed_commit_creates_no_records() {
        let h = harness();
        h.manager.upload(PARENT, batch(&["a"])).unwrap();

        h.store.fail_commits(true);
        assert!(h.manager.upload(PARENT, batch(&["b", "c"])).is_err());
        h.store.fail_commits(false);

        let images = h.store.list_images(PARENT).unwrap();
        assert_eq!(images.len(), 1);
        assert_invariants(h.store.as_ref(), PARENT);
    }

    #[test]
    fn test_failed_commit_on_delete_keeps_row_and_blob() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b"])).unwrap();

        h.store.fail_commits(true);
        assert!(h.manager.delete(PARENT, created[0].id).is_err());
        h.store.fail_commits(false);

        assert_eq!(h.store.list_images(PARENT).unwrap().len(), 2);
        assert!(h.blobs.root().join(&created[0].storage_key).is_file());
        assert_eq!(cover_id(h.store.as_ref()), Some(created[0].id));
    }

    #[test]
    fn test_missing_blob_does_not_fail_delete() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a"])).unwrap();
        std::fs::remove_file(h.blobs.root().join(&created[0].storage_key)).unwrap();

        let outcome = h.manager.delete(PARENT, created[0].id).unwrap();
        assert!(!outcome.blob_removed);
        assert_eq!(outcome.new_cover_id, None);
        assert!(h.store.list_images(PARENT).unwrap().is_empty());
    }

    // -- Delete / cover -------------------------------------------------------

    #[test]
    fn test_delete_non_cover_keeps_cover() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b", "c"])).unwrap();
        let outcome = h.manager.delete(PARENT, created[1].id).unwrap();
        assert_eq!(outcome.new_cover_id, None);
        assert_eq!(cover_id(h.store.as_ref()), Some(created[0].id));
        assert_eq!(
            orders_by_id(h.store.as_ref()),
            vec![(created[0].id, 0), (created[2].id, 1)]
        );
    }

    #[test]
    fn test_delete_promotes_lowest_order_not_lowest_id() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b", "c"])).unwrap();
        let (a, b, c) = (created[0].id, created[1].id, created[2].id);
        h.manager
            .reorder(
                PARENT,
                &[
                    ReorderItem::new(a, 0),
                    ReorderItem::new(c, 1),
                    ReorderItem::new(b, 2),
                ],
            )
            .unwrap();

        let outcome = h.manager.delete(PARENT, a).unwrap();
        assert_eq!(outcome.new_cover_id, Some(c));
        assert_eq!(orders_by_id(h.store.as_ref()), vec![(b, 1), (c, 0)]);
    }

    #[test]
    fn test_delete_and_set_cover_scoped_to_parent() {
        let h = harness();
        h.store.register_parent("listing-2", "org-1").unwrap();
        let other = h.manager.upload("listing-2", batch(&["x"])).unwrap();

        assert!(matches!(
            h.manager.delete(PARENT, other[0].id),
            Err(GalleryError::NotFound { resource: "image", .. })
        ));
        assert!(matches!(
            h.manager.set_cover(PARENT, other[0].id),
            Err(GalleryError::NotFound { .. })
        ));
        assert_eq!(h.store.list_images("listing-2").unwrap().len(), 1);
    }

    #[test]
    fn test_set_cover_is_idempotent() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b"])).unwrap();
        h.manager.set_cover(PARENT, created[1].id).unwrap();
        h.manager.set_cover(PARENT, created[1].id).unwrap();
        assert_eq!(cover_id(h.store.as_ref()), Some(created[1].id));
        assert_invariants(h.store.as_ref(), PARENT);
    }

    // -- Reorder --------------------------------------------------------------

    #[test]
    fn test_reorder_is_idempotent() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b", "c", "d"])).unwrap();
        let items: Vec<ReorderItem> = created
            .iter()
            .rev()
            .enumerate()
            .map(|(pos, r)| ReorderItem::new(r.id, pos as i64))
            .collect();

        h.manager.reorder(PARENT, &items).unwrap();
        let first = orders_by_id(h.store.as_ref());
        h.manager.reorder(PARENT, &items).unwrap();
        assert_eq!(orders_by_id(h.store.as_ref()), first);
        assert_eq!(first[0], (created[0].id, 3));
    }

    #[test]
    fn test_reorder_ignores_foreign_ids_and_clamps() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b", "c"])).unwrap();
        let (a, b, c) = (created[0].id, created[1].id, created[2].id);

        let count = h
            .manager
            .reorder(
                PARENT,
                &[
                    ReorderItem::new(9999, 0),
                    ReorderItem::new(c, -3),
                    ReorderItem::new(a, 7),
                ],
            )
            .unwrap();
        assert_eq!(count, 3);
        // Effective: c=0, b=1 (unchanged), a=7.
        assert_eq!(orders_by_id(h.store.as_ref()), vec![(a, 2), (b, 1), (c, 0)]);
    }

    #[test]
    fn test_reorder_duplicates_resolved_by_id() {
        let h = harness();
        let created = h.manager.upload(PARENT, batch(&["a", "b", "c"])).unwrap();
        let (a, b, c) = (created[0].id, created[1].id, created[2].id);

        h.manager
            .reorder(
                PARENT,
                &[ReorderItem::new(c, 1), ReorderItem::new(a, 1), ReorderItem::new(b, 1)],
            )
            .unwrap();
        assert_eq!(orders_by_id(h.store.as_ref()), vec![(a, 0), (b, 1), (c, 2)]);
    }

    #[test]
    fn test_reorder_rejects_malformed_payload() {
        let h = harness();
        h.manager.upload(PARENT, batch(&["a"])).unwrap();
        assert!(matches!(
            h.manager.reorder(PARENT, &[]),
            Err(GalleryError::InvalidInput { .. })
        ));
        let bad = ReorderItem {
            id: Some(1.into()),
            order: None,
        };
        assert!(matches!(
            h.manager.reorder(PARENT, &[bad]),
            Err(GalleryError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_list_requires_parent() {
        let h = harness();
        assert!(h.manager.list(PARENT).unwrap().is_empty());
        assert!(matches!(
            h.manager.list("ghost"),
            Err(GalleryError::NotFound { .. })
        ));
    }

    // -- SQLite + concurrency -------------------------------------------------

    #[test]
    fn test_sqlite_scenarios_hold_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteGalleryStore::new(":memory:").unwrap());
        store.register_parent(PARENT, "org-1").unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path(), 8).unwrap());
        let manager =
            GalleryManager::new(store.clone(), store.clone(), blobs, GalleryOptions::default());

        let created = manager.upload(PARENT, batch(&["f1", "f2", "f3"])).unwrap();
        manager.set_cover(PARENT, created[2].id).unwrap();
        let outcome = manager.delete(PARENT, created[2].id).unwrap();
        assert_eq!(outcome.new_cover_id, Some(created[0].id));
        manager
            .reorder(
                PARENT,
                &[ReorderItem::new(created[1].id, 0), ReorderItem::new(created[0].id, 5)],
            )
            .unwrap();

        let images = store.list_images(PARENT).unwrap();
        assert_eq!(images[0].id, created[1].id);
        assert_eq!(images[1].id, created[0].id);
        assert!(images[1].is_cover);
        assert_invariants(store.as_ref(), PARENT);
    }

    #[test]
    fn test_concurrent_uploads_and_deletes_keep_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("gallery.db");
        let store = Arc::new(SqliteGalleryStore::new(db_path.to_str().unwrap()).unwrap());
        store.register_parent(PARENT, "org-1").unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path().join("blobs"), 8).unwrap());
        let manager = Arc::new(GalleryManager::new(
            store.clone(),
            store.clone(),
            blobs,
            GalleryOptions::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    let created = manager
                        .upload(PARENT, batch(&[format!("t{t}a").as_str(), format!("t{t}b").as_str()]))
                        .unwrap();
                    manager.delete(PARENT, created[0].id).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let images = store.list_images(PARENT).unwrap();
        assert_eq!(images.len(), 8);
        assert_eq!(images.iter().filter(|r| r.is_cover).count(), 1);
        let ids: BTreeSet<i64> = images.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 8);
        assert_invariants(store.as_ref(), PARENT);
    }
}
