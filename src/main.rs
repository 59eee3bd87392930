//! Vitrine -- ordered image gallery server.
//!
//! Crash-only design: every startup is a recovery. There is no separate
//! recovery mode. SIGTERM/SIGINT handlers only stop accepting connections
//! and wait with a timeout before exiting -- no cleanup.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use vitrine::gallery::manager::GalleryManager;
use vitrine::metadata::sqlite::SqliteGalleryStore;
use vitrine::storage::local::LocalBlobStore;

/// Command-line arguments for the Vitrine server.
#[derive(Parser, Debug)]
#[command(name = "vitrine", version, about = "Ordered image gallery server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "vitrine.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &vitrine::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = vitrine::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    // Crash-only startup: every startup IS recovery. Stale temp files are
    // swept when the blob store opens below.
    info!("Crash-only startup: performing recovery checks");

    if config.observability.metrics {
        vitrine::metrics::init_metrics();
        vitrine::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Initialize metadata store (SQLite).
    let metadata_path = &config.metadata.sqlite.path;
    // Ensure parent directory exists for the SQLite file.
    if let Some(parent) = std::path::Path::new(metadata_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteGalleryStore::new(metadata_path)?);
    info!("SQLite gallery store initialized at {}", metadata_path);

    // Initialize blob storage.
    let storage_root = &config.storage.root_dir;
    let blobs = LocalBlobStore::new(storage_root, config.storage.chunk_size)?;
    blobs.sweep_temp()?;
    let blobs = Arc::new(blobs);
    info!("Local blob store initialized at {}", storage_root);

    let gallery = Arc::new(GalleryManager::new(
        store.clone(),
        store,
        blobs,
        config.gallery.options(),
    ));

    let state = Arc::new(vitrine::AppState {
        config: config.clone(),
        gallery,
    });

    let app = vitrine::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Vitrine listening on {}", bind_addr);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections
    // and give in-flight requests `shutdown_timeout` seconds to finish.
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = tx.send(());
        })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = rx.await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Shutdown timeout of {:?} elapsed with requests in flight", shutdown_timeout);
        }
    }

    info!("Vitrine shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
