//! Blob storage.
//!
//! The [`backend::BlobStore`] trait abstracts over where image bytes
//! physically live; [`local::LocalBlobStore`] keeps them on local disk.
//! [`input::FileInput`] is what callers hand over to be stored.

pub mod backend;
pub mod input;
pub mod local;
