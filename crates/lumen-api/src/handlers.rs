//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters via axum extractors,
//! interacts with AppState services, and returns JSON responses. Search
//! and ingest degrade into structured response bodies rather than raw
//! errors; only parameter validation surfaces as HTTP error statuses.

use std::path::Path as FilePath;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lumen_core::types::ImageRecord;
use lumen_vector::{IngestStage, SearchOutcome};

use crate::error::ApiError;
use crate::state::AppState;

/// Image file extensions accepted for ingest.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "heif"];

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: i64,
    pub filename: String,
    pub caption: Option<String>,
    pub storage_url: String,
    pub uploaded_at: DateTime<Utc>,
    pub similarity_score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Path of the already-stored image file to index.
    pub path: String,
    /// Original filename; derived from the path when absent.
    pub filename: Option<String>,
    /// Public location of the stored bytes; defaults to the path.
    pub storage_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: i64,
    pub filename: String,
    pub caption: Option<String>,
    pub storage_url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageItem>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexStatus {
    pub vectors: usize,
    pub dimension: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub image_count: u64,
    pub index: IndexStatus,
}

impl From<ImageRecord> for ImageItem {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            caption: record.caption,
            storage_url: record.storage_url,
            uploaded_at: record.uploaded_at,
        }
    }
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - service status including index and store counts.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let image_count = state.images.count().map_err(ApiError::from)?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        image_count,
        index: IndexStatus {
            vectors: state.index.count(),
            dimension: state.index.dimension(),
        },
    }))
}

/// GET /search - natural-language photo search.
///
/// Always answers 200 with a structured body; an empty library and a
/// degraded model produce distinguishable `message`/`error` fields.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;

    if q.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Parameter 'q' must not be empty".to_string(),
        ));
    }
    if params.k == Some(0) {
        return Err(ApiError::BadRequest(
            "Parameter 'k' must be at least 1".to_string(),
        ));
    }

    let outcome = state.pipeline.search(&q, params.k).await;
    let response = match outcome {
        SearchOutcome::Results(matches) => {
            let results: Vec<SearchResultItem> = matches
                .into_iter()
                .map(|m| SearchResultItem {
                    id: m.record.id,
                    filename: m.record.filename,
                    caption: m.record.caption,
                    storage_url: m.record.storage_url,
                    uploaded_at: m.record.uploaded_at,
                    similarity_score: m.similarity,
                })
                .collect();
            let count = results.len();
            SearchResponse {
                query: q,
                results,
                count,
                message: None,
                error: None,
            }
        }
        SearchOutcome::NoResults { message } => SearchResponse {
            query: q,
            results: Vec::new(),
            count: 0,
            message: Some(message),
            error: None,
        },
        SearchOutcome::Failed { reason } => SearchResponse {
            query: q,
            results: Vec::new(),
            count: 0,
            message: None,
            error: Some(reason),
        },
    };

    Ok(Json(response))
}

/// POST /images - index an already-stored image file.
///
/// Failures past validation come back as 200 with `success: false` and the
/// stage that broke, mirroring how the ingest pipeline reports them.
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    if request.path.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Field 'path' must not be empty".to_string(),
        ));
    }

    let path = FilePath::new(&request.path);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Invalid file type '.{}'. Allowed: {}",
            extension,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let filename = request.filename.clone().unwrap_or_else(|| {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    });
    let storage_url = request
        .storage_url
        .clone()
        .unwrap_or_else(|| request.path.clone());

    let response = match state.pipeline.ingest(path, &filename, &storage_url).await {
        Ok(receipt) => IngestResponse {
            filename,
            success: true,
            id: Some(receipt.id),
            caption: Some(receipt.caption),
            error: None,
            stage: None,
        },
        Err(failure) => IngestResponse {
            filename,
            success: false,
            id: None,
            caption: None,
            error: Some(failure.message),
            stage: Some(failure.stage),
        },
    };

    Ok(Json(response))
}

/// GET /images - recently uploaded images, newest first.
pub async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ImagesResponse>, ApiError> {
    let cap = state.config.storage.list_limit as u64;
    let limit = params.limit.unwrap_or(cap).min(cap).max(1);

    let records = state.images.list_recent(limit).map_err(ApiError::from)?;
    let images: Vec<ImageItem> = records.into_iter().map(ImageItem::from).collect();
    let count = images.len();

    Ok(Json(ImagesResponse { images, count }))
}

/// GET /images/{id} - single image record.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ImageItem>, ApiError> {
    let record = state
        .images
        .find_by_id(id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("No image with id {}", id)))?;

    Ok(Json(record.into()))
}
