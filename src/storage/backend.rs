//! Abstract blob store trait and media type policy.
//!
//! Every blob backend must implement [`BlobStore`].  Saving validates the
//! file against the image allow-list; deleting is always best-effort and
//! never fails the caller.

use std::path::PathBuf;

use crate::errors::GalleryError;

use super::input::FileInput;

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// JPEG; the original spelling of the extension is kept.
    Jpeg { ext: &'static str },
    Png,
    Webp,
}

impl MediaType {
    /// Map a declared content type onto the allow-list.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaType::Jpeg { ext: "jpg" }),
            "image/png" => Some(MediaType::Png),
            "image/webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Map a filename's extension onto the allow-list.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "jpg" => Some(MediaType::Jpeg { ext: "jpg" }),
            "jpeg" => Some(MediaType::Jpeg { ext: "jpeg" }),
            "png" => Some(MediaType::Png),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Extension written to disk. Always one of `jpg`, `jpeg`, `png`, `webp`.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Jpeg { ext } => *ext,
            MediaType::Png => "png",
            MediaType::Webp => "webp",
        }
    }
}

/// Validate a file against the allow-list: declared content type first,
/// then the filename extension.
pub fn detect_media_type(file: &dyn FileInput) -> Result<MediaType, GalleryError> {
    file.content_type()
        .and_then(MediaType::from_content_type)
        .or_else(|| MediaType::from_filename(file.filename()))
        .ok_or_else(|| GalleryError::UnsupportedMediaType {
            filename: file.filename().to_string(),
        })
}

/// Where a saved blob ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBlob {
    /// Generated filename (`<micros>-<index>-<hex>.<ext>`).
    pub filename: String,
    /// Key relative to the storage root (`<scope>/<parent>/<filename>`).
    pub storage_key: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Bytes written.
    pub size: u64,
}

/// Check that `segment` can be used verbatim as one directory name.
///
/// Scope and parent ids pass through here both when a parent is registered
/// and when a blob is saved.
pub fn validate_segment(kind: &str, segment: &str) -> Result<(), GalleryError> {
    let valid = !segment.is_empty()
        && segment.len() <= 128
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GalleryError::invalid(format!(
            "{kind} id '{segment}' is not a valid storage path segment"
        )))
    }
}

/// Binary image storage contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Persist `file` under `<scope_id>/<parent_id>/`, streaming its content
    /// in bounded chunks. `batch_index` is the file's position in the upload.
    fn save(
        &self,
        scope_id: &str,
        parent_id: &str,
        batch_index: usize,
        file: &mut dyn FileInput,
    ) -> Result<SavedBlob, GalleryError>;

    /// Remove the blob at `storage_key`. Returns `false`, never an error,
    /// when the key escapes the root, the file is missing, or removal fails.
    fn delete(&self, storage_key: &str) -> bool;

    /// Whether `storage_key` names a regular file inside the storage root.
    fn contains(&self, storage_key: &str) -> bool;
}
