//! Local filesystem blob store.
//!
//! Blobs are stored as files under a configurable root directory, laid out
//! as `<root>/<scope>/<parent>/<generated-name>.<ext>`.
//!
//! All writes follow crash-only design: stream to a temp file under
//! `<root>/.tmp`, fsync, rename into place.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::{debug, info, warn};

use super::backend::{detect_media_type, validate_segment, BlobStore, SavedBlob};
use super::input::FileInput;
use crate::errors::GalleryError;
use crate::metrics::BLOB_BYTES_WRITTEN_TOTAL;

/// Default read/write chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Last timestamp handed out by [`monotonic_micros`].
static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

/// Microseconds since the epoch, strictly increasing across calls in this
/// process even if the wall clock stalls or steps backwards.
fn monotonic_micros() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(seen) => last = seen,
        }
    }
}

/// Generate a collision-resistant blob filename.
fn generate_filename(batch_index: usize, extension: &str) -> String {
    let suffix: [u8; 2] = rand::random();
    format!(
        "{}-{}-{}.{}",
        monotonic_micros(),
        batch_index,
        hex::encode(suffix),
        extension
    )
}

/// Remove every file under `tmp_dir`. Nothing there is referenced by
/// metadata: a blob only becomes visible once renamed out of it.
fn sweep_temp_dir(tmp_dir: &Path) -> anyhow::Result<usize> {
    let mut swept = 0;
    for entry in std::fs::read_dir(tmp_dir)
        .with_context(|| format!("failed to read {}", tmp_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => swept += 1,
            Err(e) => warn!(path = %path.display(), "failed to remove temp file: {e}"),
        }
    }
    Ok(swept)
}

/// Stores blobs on the local filesystem.
pub struct LocalBlobStore {
    /// Root directory for all stored blobs.
    root: PathBuf,
    /// Size of the buffer content is streamed through.
    chunk_size: usize,
}

impl LocalBlobStore {
    /// Create a new `LocalBlobStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage root {}", root.display()))?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Root directory blobs are stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage key to a path under the root.
    ///
    /// Returns `None` for empty or absolute keys and for keys with any
    /// component other than a plain name (`..`, `.`, prefixes).
    fn resolve(&self, storage_key: &str) -> Option<PathBuf> {
        let key = Path::new(storage_key);
        if storage_key.is_empty() || key.is_absolute() {
            return None;
        }
        if !key.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(key))
    }

    /// Remove temp files left behind by writes interrupted in a previous
    /// process. Only safe while no other process writes to this root.
    pub fn sweep_temp(&self) -> anyhow::Result<usize> {
        let swept = sweep_temp_dir(&self.root.join(".tmp"))?;
        if swept > 0 {
            info!(swept, "removed temp files left by an interrupted write");
        }
        Ok(swept)
    }

    /// Whether `path` still lies under the root once symlinks are followed.
    fn is_contained(&self, path: &Path) -> bool {
        match (path.canonicalize(), self.root.canonicalize()) {
            (Ok(path), Ok(root)) => path.starts_with(root),
            _ => false,
        }
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }

    /// Stream `file` into `tmp_path` chunk by chunk and fsync it.
    fn spool(&self, file: &mut dyn FileInput, tmp_path: &Path) -> anyhow::Result<u64> {
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            let n = file
                .read_chunk(&mut buf)
                .with_context(|| format!("failed to read upload '{}'", file.filename()))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            written += n as u64;
        }
        out.sync_all()?; // fsync
        Ok(written)
    }
}

impl BlobStore for LocalBlobStore {
    fn save(
        &self,
        scope_id: &str,
        parent_id: &str,
        batch_index: usize,
        file: &mut dyn FileInput,
    ) -> Result<SavedBlob, GalleryError> {
        let media = detect_media_type(file)?;
        validate_segment("scope", scope_id)?;
        validate_segment("parent", parent_id)?;

        let dir = self.root.join(scope_id).join(parent_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let filename = generate_filename(batch_index, media.extension());
        let final_path = dir.join(&filename);

        // Crash-only: temp-fsync-rename pattern.
        let tmp_path = self.temp_path();
        let size = match self.spool(file, &tmp_path) {
            Ok(size) => size,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e.into());
            }
        };
        if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(anyhow::Error::new(e)
                .context(format!("failed to move blob into {}", final_path.display()))
                .into());
        }

        metrics::counter!(BLOB_BYTES_WRITTEN_TOTAL).increment(size);
        debug!(path = %final_path.display(), size, "blob saved");

        Ok(SavedBlob {
            storage_key: format!("{scope_id}/{parent_id}/{filename}"),
            filename,
            path: final_path,
            size,
        })
    }

    fn delete(&self, storage_key: &str) -> bool {
        let Some(path) = self.resolve(storage_key) else {
            warn!(storage_key, "refusing to delete blob outside storage root");
            return false;
        };
        if !path.is_file() {
            debug!(storage_key, "blob already absent");
            return false;
        }
        if !self.is_contained(&path) {
            warn!(storage_key, "blob resolves outside storage root");
            return false;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(storage_key, "failed to delete blob: {e}");
                false
            }
        }
    }

    fn contains(&self, storage_key: &str) -> bool {
        self.resolve(storage_key)
            .is_some_and(|path| path.is_file() && self.is_contained(&path))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
