//! Gallery consistency engine.
//!
//! [`manager::GalleryManager`] owns the four mutations (upload, delete,
//! set-cover, reorder) and keeps every parent's gallery at one cover at
//! most and dense zero-based ordering.  [`order`] holds the pure ranking
//! helpers the manager uses.

pub mod manager;
pub mod order;

/// Default cap on files carried by a single upload request.
pub const DEFAULT_MAX_FILES_PER_REQUEST: usize = 10;

/// Default cap on images held by a single parent.
pub const DEFAULT_MAX_IMAGES_PER_PARENT: u32 = 30;

/// Limits and URL settings a [`manager::GalleryManager`] is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryOptions {
    pub max_files_per_request: usize,
    pub max_images_per_parent: u32,
    /// Prefix for public image URLs: `<base>/<parent_id>/<filename>`.
    pub public_base_url: String,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        Self {
            max_files_per_request: DEFAULT_MAX_FILES_PER_REQUEST,
            max_images_per_parent: DEFAULT_MAX_IMAGES_PER_PARENT,
            public_base_url: "/images".to_string(),
        }
    }
}

impl GalleryOptions {
    /// Public URL for a stored file.
    pub fn image_url(&self, parent_id: &str, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            parent_id,
            filename
        )
    }
}
