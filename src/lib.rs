//! Vitrine library: ordered image galleries.
//!
//! This crate keeps per-parent image galleries consistent (one cover at
//! most, dense zero-based ordering) across SQLite metadata and a local
//! blob directory, and serves them over HTTP.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod gallery;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod serialization;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::gallery::manager::GalleryManager;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The gallery engine every mutation goes through.
    pub gallery: Arc<GalleryManager>,
}
