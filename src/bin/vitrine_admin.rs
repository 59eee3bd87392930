//! CLI entry point for vitrine-admin: parent registration, export and audit.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vitrine::config::{load_config, Config};
use vitrine::metadata::sqlite::SqliteGalleryStore;
use vitrine::serialization::{audit_store, export_galleries, ExportOptions};
use vitrine::storage::local::LocalBlobStore;

#[derive(Parser)]
#[command(name = "vitrine-admin", about = "Vitrine gallery administration tool")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "vitrine.yaml")]
    config: PathBuf,

    /// Override the SQLite database path from the config.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a parent so it can receive uploads
    AddParent {
        #[arg(long)]
        id: String,
        #[arg(long)]
        scope: String,
    },
    /// Export parents and their galleries to JSON
    Export {
        /// Only export this parent.
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, default_value = "-")]
        output: String,
    },
    /// Check every gallery for cover, ordering and storage key violations
    Check,
}

fn main() {
    let cli = Cli::parse();
    let config = match read_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading config: {e:#}");
            std::process::exit(1);
        }
    };
    let db_path = cli.db.unwrap_or_else(|| config.metadata.sqlite.path.clone());

    let rc = match cli.command {
        Commands::AddParent { id, scope } => run_add_parent(&db_path, &id, &scope),
        Commands::Export { parent, output } => run_export(&db_path, parent, &output),
        Commands::Check => run_check(&db_path, &config),
    };
    std::process::exit(rc);
}

/// A missing config file means defaults.
fn read_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn open_store(db_path: &str) -> Option<SqliteGalleryStore> {
    match SqliteGalleryStore::new(db_path) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Error opening database {db_path}: {e:#}");
            None
        }
    }
}

fn run_add_parent(db_path: &str, id: &str, scope: &str) -> i32 {
    let Some(store) = open_store(db_path) else {
        return 1;
    };
    match store.register_parent(id, scope) {
        Ok(parent) => {
            if parent.scope_id != scope {
                eprintln!(
                    "Parent {} already exists with scope {}",
                    parent.id, parent.scope_id
                );
                return 1;
            }
            eprintln!("Registered parent {} (scope {})", parent.id, parent.scope_id);
            0
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    }
}

fn run_export(db_path: &str, parent: Option<String>, output: &str) -> i32 {
    let Some(store) = open_store(db_path) else {
        return 1;
    };
    let parents = match store.list_parents() {
        Ok(parents) => parents,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return 1;
        }
    };

    let opts = ExportOptions { parent };
    let json = match export_galleries(&store, &parents, &opts) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return 1;
        }
    };

    if output == "-" {
        println!("{json}");
    } else if let Err(e) = std::fs::write(output, format!("{json}\n")) {
        eprintln!("Error writing output: {e}");
        return 1;
    } else {
        eprintln!("Exported to {output}");
    }
    0
}

fn run_check(db_path: &str, config: &Config) -> i32 {
    let Some(store) = open_store(db_path) else {
        return 1;
    };
    let blobs = match LocalBlobStore::new(&config.storage.root_dir, config.storage.chunk_size) {
        Ok(blobs) => blobs,
        Err(e) => {
            eprintln!("Error opening storage root: {e:#}");
            return 1;
        }
    };

    let report = match audit_store(&store, &store, &blobs) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return 1;
        }
    };

    for violation in &report.violations {
        println!(
            "{}\t{:?}\t{}",
            violation.parent_id, violation.kind, violation.detail
        );
    }
    eprintln!(
        "Checked {} galleries ({} images): {} violations",
        report.galleries,
        report.images,
        report.violations.len()
    );
    if report.is_clean() {
        0
    } else {
        2
    }
}
