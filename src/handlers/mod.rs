//! HTTP handlers for the gallery API.

pub mod images;
