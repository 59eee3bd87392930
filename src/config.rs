//! Configuration loading and types for Vitrine.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, metadata persistence, blob storage, gallery limits,
//! and logging.  Numeric limits are checked with `garde` after parsing.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;

use crate::gallery::GalleryOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    #[garde(dive)]
    pub server: ServerConfig,

    /// Metadata store settings.
    #[serde(default)]
    #[garde(dive)]
    pub metadata: MetadataConfig,

    /// Blob storage settings.
    #[serde(default)]
    #[garde(dive)]
    pub storage: StorageConfig,

    /// Gallery limits and URL assembly.
    #[serde(default)]
    #[garde(dive)]
    pub gallery: GalleryConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(dive)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    #[garde(skip)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    #[garde(skip)]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    #[garde(skip)]
    pub shutdown_timeout: u64,

    /// Maximum request body size in bytes (default 100 MiB).
    #[serde(default = "default_max_body_bytes")]
    #[garde(range(min = 1024))]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    #[garde(pattern(r"^(trace|debug|info|warn|error)$"))]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    #[garde(pattern(r"^(text|json)$"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MetadataConfig {
    /// SQLite-specific configuration.
    #[serde(default)]
    #[garde(dive)]
    pub sqlite: SqliteConfig,
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SqliteConfig {
    /// Path to the SQLite database file (`:memory:` for an ephemeral store).
    #[serde(default = "default_metadata_path")]
    #[garde(length(min = 1))]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Local blob storage configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StorageConfig {
    /// Root directory for stored images.
    #[serde(default = "default_storage_root")]
    #[garde(length(min = 1))]
    pub root_dir: String,

    /// Buffer size uploads are streamed through, in bytes.
    #[serde(default = "default_chunk_size")]
    #[garde(range(min = 1024, max = 16_777_216))]
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Gallery limits.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GalleryConfig {
    /// Maximum number of files accepted in one upload request.
    #[serde(default = "default_max_files_per_request")]
    #[garde(range(min = 1))]
    pub max_files_per_request: usize,

    /// Maximum number of images a single parent may hold.
    #[serde(default = "default_max_images_per_parent")]
    #[garde(range(min = 1))]
    pub max_images_per_parent: u32,

    /// Base URL image URLs are assembled from (`<base>/<parent>/<file>`).
    #[serde(default = "default_public_base_url")]
    #[garde(length(min = 1))]
    pub public_base_url: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            max_files_per_request: default_max_files_per_request(),
            max_images_per_parent: default_max_images_per_parent(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl GalleryConfig {
    /// Manager options for these limits.
    pub fn options(&self) -> GalleryOptions {
        GalleryOptions {
            max_files_per_request: self.max_files_per_request,
            max_images_per_parent: self.max_images_per_parent,
            public_base_url: self.public_base_url.clone(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9020
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_metadata_path() -> String {
    "./data/gallery.db".to_string()
}

fn default_storage_root() -> String {
    "./data/images".to_string()
}

fn default_chunk_size() -> usize {
    crate::storage::local::DEFAULT_CHUNK_SIZE
}

fn default_max_files_per_request() -> usize {
    crate::gallery::DEFAULT_MAX_FILES_PER_REQUEST
}

fn default_max_images_per_parent() -> u32 {
    crate::gallery::DEFAULT_MAX_IMAGES_PER_PARENT
}

fn default_public_base_url() -> String {
    "/images".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config
        .validate()
        .map_err(|report| anyhow::anyhow!("invalid configuration: {report}"))?;
    Ok(config)
}
