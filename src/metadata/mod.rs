//! Metadata storage layer.
//!
//! The metadata store keeps track of gallery images and the parents that
//! own them.  The [`store::GalleryStore`] and [`store::ParentRegistry`]
//! traits define the interface; [`sqlite::SqliteGalleryStore`] is the
//! default implementation and [`memory::MemoryGalleryStore`] backs tests
//! and ephemeral deployments.

pub mod memory;
pub mod sqlite;
pub mod store;
