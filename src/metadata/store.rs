//! Abstract gallery store traits.
//!
//! Any metadata backend must implement [`GalleryStore`] (per-parent
//! transactional image records) and usually [`ParentRegistry`] (the
//! owning entities).  All mutation goes through a [`GalleryTx`] obtained
//! from [`GalleryStore::begin`], which is scoped to a single parent and
//! holds that backend's write exclusion until it is committed or dropped.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ── Record types ───────────────────────────────────────────────────

/// Metadata record for a single gallery image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageRecord {
    /// Store-assigned identifier, increasing in insertion order.
    pub id: i64,
    /// Owning parent.
    pub parent_id: String,
    /// Public URL the image is served from.
    pub url: String,
    /// Blob key relative to the storage root (`scope/parent/file.ext`).
    pub storage_key: String,
    /// Whether this is the gallery's cover image.
    pub is_cover: bool,
    /// Dense zero-based display rank.
    pub sort_order: u32,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Fields supplied when inserting an image; the store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub url: String,
    pub storage_key: String,
    pub is_cover: bool,
    pub sort_order: u32,
    pub created_at: String,
}

/// The entity that owns a gallery (e.g. a listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRecord {
    /// Parent identifier.
    pub id: String,
    /// Tenant/organization the parent belongs to. Namespaces blob paths.
    pub scope_id: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Current time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Traits ──────────────────────────────────────────────────────────

/// An open write transaction over one parent's gallery.
///
/// Every read observes the transaction's own writes.  Dropping the value
/// without calling [`GalleryTx::commit`] rolls back all changes.
pub trait GalleryTx {
    /// Number of images the parent has.
    fn count(&mut self) -> anyhow::Result<u32>;

    /// `max(sort_order) + 1`, or 0 for an empty gallery.
    fn next_order(&mut self) -> anyhow::Result<u32>;

    /// Whether any image of the parent is flagged as cover.
    fn has_cover(&mut self) -> anyhow::Result<bool>;

    /// All images of the parent ordered by `(sort_order, id)`.
    fn list(&mut self) -> anyhow::Result<Vec<ImageRecord>>;

    /// A single image, only if it belongs to this parent.
    fn get(&mut self, image_id: i64) -> anyhow::Result<Option<ImageRecord>>;

    /// Insert a new image for the parent and return the stored record.
    fn insert(&mut self, image: NewImage) -> anyhow::Result<ImageRecord>;

    /// Overwrite one image's `sort_order`.
    fn set_sort_order(&mut self, image_id: i64, sort_order: u32) -> anyhow::Result<()>;

    /// Rewrite the cover flag of every image of the parent: `true` for
    /// `image_id`, `false` for all others.
    fn assign_exclusive_cover(&mut self, image_id: i64) -> anyhow::Result<()>;

    /// Remove one image row.
    fn delete(&mut self, image_id: i64) -> anyhow::Result<()>;

    /// Make every change visible atomically.
    fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// Transactional repository of per-parent ordered image records.
pub trait GalleryStore: Send + Sync + 'static {
    /// Open a write transaction scoped to `parent_id`.
    ///
    /// Concurrent transactions on the same store are serialized; the call
    /// blocks until the previous one finishes.
    fn begin<'a>(&'a self, parent_id: &str) -> anyhow::Result<Box<dyn GalleryTx + 'a>>;

    /// Read-only snapshot of a parent's gallery ordered by `(sort_order, id)`.
    fn list_images(&self, parent_id: &str) -> anyhow::Result<Vec<ImageRecord>>;

    /// Every parent id that currently has at least one image, sorted.
    fn gallery_parent_ids(&self) -> anyhow::Result<Vec<String>>;
}

/// External entity repository the manager validates upload targets against.
pub trait ParentRegistry: Send + Sync + 'static {
    /// Check whether a parent exists.
    fn exists(&self, parent_id: &str) -> anyhow::Result<bool> {
        Ok(self.fetch(parent_id)?.is_some())
    }

    /// Look up a parent by id.
    fn fetch(&self, parent_id: &str) -> anyhow::Result<Option<ParentRecord>>;
}
