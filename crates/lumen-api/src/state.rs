//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use lumen_core::config::LumenConfig;
use lumen_storage::{Database, ImageRepository};
use lumen_vector::{SearchPipeline, VectorIndex};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. The vector
/// index carries its own interior lock.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<LumenConfig>,
    /// Process-wide vector index instance.
    pub index: Arc<VectorIndex>,
    /// SQLite metadata store.
    pub database: Arc<Database>,
    /// Photo metadata repository.
    pub images: Arc<ImageRepository>,
    /// Search and ingest pipeline.
    pub pipeline: Arc<SearchPipeline>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState with the given components.
    pub fn new(
        config: LumenConfig,
        index: Arc<VectorIndex>,
        database: Arc<Database>,
        images: Arc<ImageRepository>,
        pipeline: SearchPipeline,
    ) -> Self {
        Self {
            config: Arc::new(config),
            index,
            database,
            images,
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }
}
