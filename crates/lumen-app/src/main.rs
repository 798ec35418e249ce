//! Lumen application binary - composition root.
//!
//! Ties together the Lumen crates into a single executable:
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the SQLite metadata store
//! 3. Initialize the vector index (local snapshot → remote fetch → empty)
//! 4. Build the search/ingest pipeline
//! 5. Start the axum REST API server

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use lumen_api::routes;
use lumen_api::state::AppState;
use lumen_core::config::LumenConfig;
use lumen_core::error::LumenError;
use lumen_storage::{Database, ImageRepository};
use lumen_vector::{
    snapshot, DirTransport, MockProvider, RemoteSync, SearchPipeline, VectorIndex,
};

mod cli;

/// Expand ~ to the home directory in a path string.
fn resolve_dir(dir: &str) -> PathBuf {
    if dir.starts_with("~/") || dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&dir[2..])
    } else {
        PathBuf::from(dir)
    }
}

/// Build the remote sync handle when a remote mirror is configured.
fn build_remote(config: &LumenConfig) -> Option<RemoteSync> {
    match (&config.index.remote_key, &config.index.remote_dir) {
        (Some(key), Some(dir)) => Some(RemoteSync::new(
            DirTransport::new(resolve_dir(dir)),
            key.clone(),
        )),
        _ => None,
    }
}

/// Bring up the vector index: local snapshot first, then a remote fetch,
/// then an empty index.
///
/// A corrupt snapshot is never loaded — positions would desynchronize from
/// image ids — so it degrades to an empty index with a loud error.
async fn init_index(
    config: &LumenConfig,
    index_path: &Path,
    remote: Option<&RemoteSync>,
) -> Result<VectorIndex, LumenError> {
    let dimension = config.search.embedding_dim;

    if !snapshot::exists(index_path) {
        if let Some(remote) = remote {
            match remote.fetch(index_path).await {
                Ok(true) => {
                    tracing::info!(path = %index_path.display(), "Fetched snapshot from remote mirror");
                }
                Ok(false) => {
                    tracing::info!("No remote snapshot available");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Remote snapshot fetch failed, starting empty");
                }
            }
        }
    }

    if snapshot::exists(index_path) {
        match snapshot::load(index_path) {
            Ok(index) => {
                if index.dimension() != dimension {
                    tracing::warn!(
                        snapshot_dim = index.dimension(),
                        config_dim = dimension,
                        "Snapshot dimension differs from configuration; keeping snapshot dimension"
                    );
                }
                tracing::info!(vectors = index.count(), "Vector index loaded from snapshot");
                return Ok(index);
            }
            Err(e) => {
                tracing::error!(
                    path = %index_path.display(),
                    error = %e,
                    "Snapshot unusable, starting with an empty index"
                );
            }
        }
    }

    let index = VectorIndex::new(dimension)?;
    tracing::info!(dimension, "Created empty vector index");
    Ok(index)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = LumenConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Lumen v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join(&config.storage.db_filename);
    let database = Arc::new(Database::new(&db_path)?);
    let images = Arc::new(ImageRepository::new(Arc::clone(&database)));
    tracing::info!(path = %db_path.display(), "Metadata store opened");

    // Vector index (single shared instance per process).
    let index_path = data_dir.join(&config.index.filename);
    let remote = build_remote(&config);
    let index = Arc::new(init_index(&config, &index_path, remote.as_ref()).await?);

    // Pipeline. The mock provider stands in until a model backend is
    // configured; it keeps the full ingest/search path exercisable.
    let mut pipeline = SearchPipeline::new(
        Arc::clone(&index),
        MockProvider::new(index.dimension()),
        Arc::clone(&images),
        index_path.clone(),
    )
    .with_limits(config.search.default_k, config.search.max_k)
    .with_model_retries(config.search.model_retries);
    if let Some(remote) = remote {
        pipeline = pipeline.with_remote(remote);
    }

    let state = AppState::new(config, index, database, images, pipeline);

    routes::start_server(state).await?;

    Ok(())
}
