//! Gallery export and invariant audit.
//!
//! Export renders parents and their galleries as a versioned JSON
//! document.  The audit re-checks every stored gallery against the
//! invariants the manager maintains: at most one cover, dense zero-based
//! ordering, and a stored blob inside the blob root behind every key.

use serde::Serialize;
use serde_json::json;

use crate::metadata::store::{GalleryStore, ImageRecord, ParentRecord, ParentRegistry};
use crate::storage::backend::BlobStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const EXPORT_VERSION: i64 = 1;

/// Options for [`export_galleries`].
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Restrict the export to one parent.
    pub parent: Option<String>,
}

/// Render `parents` and their galleries as pretty-printed JSON.
pub fn export_galleries(
    store: &dyn GalleryStore,
    parents: &[ParentRecord],
    opts: &ExportOptions,
) -> anyhow::Result<String> {
    let mut entries = Vec::new();
    for parent in parents {
        if opts.parent.as_deref().is_some_and(|only| only != parent.id) {
            continue;
        }
        let images = store.list_images(&parent.id)?;
        entries.push(json!({
            "id": parent.id,
            "scope_id": parent.scope_id,
            "created_at": parent.created_at,
            "images": images,
        }));
    }

    if let Some(only) = &opts.parent {
        if entries.is_empty() {
            anyhow::bail!("parent not found: {only}");
        }
    }

    let doc = json!({
        "vitrine_export": {
            "version": EXPORT_VERSION,
            "exported_at": crate::metadata::store::now_rfc3339(),
            "source": format!("vitrine {VERSION}"),
        },
        "parents": entries,
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}

// -- Audit --------------------------------------------------------------------

/// What is wrong with a gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MultipleCovers,
    SparseOrder,
    MissingBlob,
    UnknownParent,
}

/// One invariant violation found by the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub parent_id: String,
    pub kind: ViolationKind,
    pub detail: String,
}

/// Summary of an audit run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub galleries: usize,
    pub images: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check one gallery, given in `(sort_order, id)` order.
pub fn audit_gallery(
    parent_id: &str,
    images: &[ImageRecord],
    blobs: &dyn BlobStore,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let violation = |kind, detail: String| Violation {
        parent_id: parent_id.to_string(),
        kind,
        detail,
    };

    let covers: Vec<i64> = images.iter().filter(|r| r.is_cover).map(|r| r.id).collect();
    if covers.len() > 1 {
        violations.push(violation(
            ViolationKind::MultipleCovers,
            format!("cover images {covers:?}"),
        ));
    }

    let orders: Vec<u32> = images.iter().map(|r| r.sort_order).collect();
    if orders.iter().enumerate().any(|(rank, &order)| order != rank as u32) {
        violations.push(violation(
            ViolationKind::SparseOrder,
            format!("sort orders {orders:?}"),
        ));
    }

    for image in images {
        if !blobs.contains(&image.storage_key) {
            violations.push(violation(
                ViolationKind::MissingBlob,
                format!(
                    "image {} has no stored blob at '{}'",
                    image.id, image.storage_key
                ),
            ));
        }
    }

    violations
}

/// Audit every gallery in `store`.
pub fn audit_store(
    store: &dyn GalleryStore,
    registry: &dyn ParentRegistry,
    blobs: &dyn BlobStore,
) -> anyhow::Result<AuditReport> {
    let mut report = AuditReport::default();
    for parent_id in store.gallery_parent_ids()? {
        let images = store.list_images(&parent_id)?;
        report.galleries += 1;
        report.images += images.len();

        if !registry.exists(&parent_id)? {
            report.violations.push(Violation {
                parent_id: parent_id.clone(),
                kind: ViolationKind::UnknownParent,
                detail: format!("{} images without a registered parent", images.len()),
            });
        }
        report
            .violations
            .extend(audit_gallery(&parent_id, &images, blobs));
    }
    Ok(report)
}
