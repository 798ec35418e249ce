//! Search and ingest pipelines.
//!
//! The SearchPipeline orchestrates the embedding provider, the vector
//! index, and the metadata store. A query runs embedding → retrieval →
//! hydration → response; an ingest runs embedding → caption → metadata
//! commit → index insert → snapshot save (+ best-effort remote push).
//!
//! Embeddings are computed before the index lock is taken: model inference
//! is the slow part and must never stall concurrent queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use lumen_core::error::LumenError;
use lumen_core::types::ImageRecord;
use lumen_storage::ImageRepository;

use crate::embedding::{with_retries, DynEmbeddingProvider, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::snapshot;
use crate::sync::RemoteSync;

/// Caption stored when the captioning model fails. Non-fatal: the image is
/// still searchable through its embedding.
pub const PLACEHOLDER_CAPTION: &str = "Caption generation failed";

/// One hydrated search result.
#[derive(Debug, Clone)]
pub struct RankedMatch {
    pub record: ImageRecord,
    /// Cosine similarity, rounded to 3 decimal digits.
    pub similarity: f64,
}

/// Outcome of a search request.
///
/// An empty library and a failed query are different answers and callers
/// present them differently.
#[derive(Debug)]
pub enum SearchOutcome {
    /// Ranked matches, descending similarity. May be empty if every index
    /// hit was dropped at hydration.
    Results(Vec<RankedMatch>),
    /// The index holds no vectors yet.
    NoResults { message: String },
    /// The query could not be processed.
    Failed { reason: String },
}

/// Stage an ingest failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Embedding,
    Caption,
    Storage,
}

/// Typed ingest failure naming the stage that broke.
#[derive(Debug, thiserror::Error)]
#[error("ingest failed at {stage:?} stage: {message}")]
pub struct IngestFailure {
    pub stage: IngestStage,
    pub message: String,
}

/// Successful ingest: the committed id and the caption that was stored.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub id: i64,
    pub caption: String,
}

/// Orchestrates embedding, retrieval, hydration, and persistence around a
/// shared vector index.
pub struct SearchPipeline {
    index: Arc<VectorIndex>,
    embedder: Box<dyn DynEmbeddingProvider>,
    images: Arc<ImageRepository>,
    index_path: PathBuf,
    remote: Option<RemoteSync>,
    default_k: usize,
    max_k: usize,
    model_retries: usize,
}

impl SearchPipeline {
    /// Create a pipeline over a shared index, provider, and metadata store.
    /// Snapshots are written to `index_path` (mapping alongside it).
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: impl EmbeddingProvider + 'static,
        images: Arc<ImageRepository>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            embedder: Box::new(embedder),
            images,
            index_path: index_path.into(),
            remote: None,
            default_k: 5,
            max_k: 50,
            model_retries: 2,
        }
    }

    /// Mirror snapshots to a remote store after each save.
    pub fn with_remote(mut self, remote: RemoteSync) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Override the default and maximum result counts.
    pub fn with_limits(mut self, default_k: usize, max_k: usize) -> Self {
        self.default_k = default_k.max(1);
        self.max_k = max_k.max(self.default_k);
        self
    }

    /// Override the retry budget for image model calls.
    pub fn with_model_retries(mut self, attempts: usize) -> Self {
        self.model_retries = attempts.max(1);
        self
    }

    /// Shared vector index backing this pipeline.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Answer a natural-language query with ranked photo matches.
    pub async fn search(&self, query: &str, k: Option<usize>) -> SearchOutcome {
        let k = k.unwrap_or(self.default_k).clamp(1, self.max_k);

        let vector = match self.embedder.text_to_vector_boxed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(query, error = %e, "Query embedding failed");
                return SearchOutcome::Failed {
                    reason: "Failed to process search query".to_string(),
                };
            }
        };

        if self.index.is_empty() {
            return SearchOutcome::NoResults {
                message: "No images found. Try uploading some images first!".to_string(),
            };
        }

        let hits = match self.index.query(&vector, k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "Index query failed");
                return SearchOutcome::Failed {
                    reason: "Search temporarily unavailable".to_string(),
                };
            }
        };

        // Hydration: resolve ids against the metadata store. Hits whose
        // record is gone (deleted images, uncommitted rows) are dropped,
        // not surfaced as errors.
        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.images.find_by_id(hit.id) {
                Ok(Some(record)) => matches.push(RankedMatch {
                    record,
                    similarity: round3(hit.score),
                }),
                Ok(None) => {
                    debug!(id = hit.id, "Dropping stale index hit with no metadata record");
                }
                Err(e) => {
                    warn!(id = hit.id, error = %e, "Hydration lookup failed, dropping hit");
                }
            }
        }

        SearchOutcome::Results(matches)
    }

    /// Ingest an already-stored image: embed, caption, commit metadata,
    /// insert into the index, persist the snapshot.
    ///
    /// An embedding failure aborts before anything is written; a caption
    /// failure falls back to a placeholder. The index is only touched once
    /// the metadata row exists, so every indexed position has an id.
    pub async fn ingest(
        &self,
        image_path: &Path,
        filename: &str,
        storage_url: &str,
    ) -> Result<IngestReceipt, IngestFailure> {
        let vector = with_retries(self.model_retries, || {
            self.embedder.image_to_vector_boxed(image_path)
        })
        .await
        .map_err(|e| {
            warn!(path = %image_path.display(), error = %e, "Image embedding failed");
            IngestFailure {
                stage: IngestStage::Embedding,
                message: e.to_string(),
            }
        })?;

        let caption = match with_retries(self.model_retries, || {
            self.embedder.image_to_caption_boxed(image_path)
        })
        .await
        {
            Ok(caption) => caption,
            Err(e) => {
                warn!(path = %image_path.display(), error = %e, "Captioning failed, storing placeholder");
                PLACEHOLDER_CAPTION.to_string()
            }
        };

        let id = self
            .images
            .create(filename, storage_url, Some(&caption))
            .map_err(|e| IngestFailure {
                stage: IngestStage::Storage,
                message: e.to_string(),
            })?;

        if let Err(e) = self.index.insert(&vector, id) {
            error!(id, error = %e, "Index insert failed after metadata commit");
            return Err(IngestFailure {
                stage: IngestStage::Storage,
                message: e.to_string(),
            });
        }

        // The in-memory index already serves the new image; a failed save
        // is retried by the next ingest's save.
        if let Err(e) = self.save_index().await {
            error!(error = %e, "Snapshot save failed");
        }

        info!(id, filename, "Image ingested");
        Ok(IngestReceipt { id, caption })
    }

    /// Persist the index snapshot pair and push it remotely if configured.
    pub async fn save_index(&self) -> Result<(), LumenError> {
        snapshot::save(&self.index, &self.index_path)?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.push(&self.index_path).await {
                warn!(error = %e, "Remote snapshot push failed");
            }
        }
        Ok(())
    }
}

/// Round a similarity score to 3 decimal digits for presentation.
fn round3(score: f32) -> f64 {
    (f64::from(score) * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockProvider;
    use crate::sync::MockTransport;
    use lumen_core::error::Result;
    use lumen_storage::Database;

    const DIM: usize = 64;

    struct Fixture {
        pipeline: SearchPipeline,
        images: Arc<ImageRepository>,
        index: Arc<VectorIndex>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(embedder: impl EmbeddingProvider + 'static) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(VectorIndex::new(DIM).unwrap());
        let images = Arc::new(ImageRepository::new(Arc::new(Database::in_memory().unwrap())));
        let pipeline = SearchPipeline::new(
            Arc::clone(&index),
            embedder,
            Arc::clone(&images),
            dir.path().join("lumen.index"),
        );
        Fixture {
            pipeline,
            images,
            index,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockProvider::new(DIM))
    }

    /// Provider whose vector calls always fail.
    struct DeadEncoder;

    impl EmbeddingProvider for DeadEncoder {
        async fn image_to_vector(&self, _path: &Path) -> Result<Vec<f32>> {
            Err(LumenError::Upstream("encoder offline".to_string()))
        }
        async fn text_to_vector(&self, _text: &str) -> Result<Vec<f32>> {
            Err(LumenError::Upstream("encoder offline".to_string()))
        }
        async fn image_to_caption(&self, _path: &Path) -> Result<String> {
            Err(LumenError::Upstream("encoder offline".to_string()))
        }
        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// Provider that embeds fine but cannot caption.
    struct MuteCaptioner(MockProvider);

    impl EmbeddingProvider for MuteCaptioner {
        async fn image_to_vector(&self, path: &Path) -> Result<Vec<f32>> {
            self.0.image_to_vector(path).await
        }
        async fn text_to_vector(&self, text: &str) -> Result<Vec<f32>> {
            self.0.text_to_vector(text).await
        }
        async fn image_to_caption(&self, _path: &Path) -> Result<String> {
            Err(LumenError::Upstream("captioner offline".to_string()))
        }
        fn dimension(&self) -> usize {
            EmbeddingProvider::dimension(&self.0)
        }
    }

    #[tokio::test]
    async fn test_ingest_then_search_finds_image() {
        let f = fixture();
        let receipt = f
            .pipeline
            .ingest(Path::new("/photos/beach.jpg"), "beach.jpg", "/uploads/beach.jpg")
            .await
            .unwrap();
        assert_eq!(receipt.caption, "a photo of beach");

        // The mock embeds the path string, so querying with the same seed
        // text retrieves the image with perfect similarity.
        let outcome = f.pipeline.search("/photos/beach.jpg", None).await;
        match outcome {
            SearchOutcome::Results(matches) => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].record.id, receipt.id);
                assert_eq!(matches[0].record.filename, "beach.jpg");
                assert!((matches[0].similarity - 1.0).abs() < 1e-3);
            }
            other => panic!("expected results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_empty_index_is_no_results() {
        let f = fixture();
        let outcome = f.pipeline.search("sunset over mountains", None).await;
        assert!(matches!(outcome, SearchOutcome::NoResults { .. }));
    }

    #[tokio::test]
    async fn test_search_embed_failure_is_failed_outcome() {
        let f = fixture_with(DeadEncoder);
        let outcome = f.pipeline.search("anything", None).await;
        match outcome {
            SearchOutcome::Failed { reason } => {
                assert_eq!(reason, "Failed to process search query");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_embed_failure_leaves_state_untouched() {
        let f = fixture_with(DeadEncoder);
        let err = f
            .pipeline
            .ingest(Path::new("/photos/x.jpg"), "x.jpg", "/uploads/x.jpg")
            .await
            .unwrap_err();
        assert_eq!(err.stage, IngestStage::Embedding);
        assert_eq!(f.index.count(), 0);
        assert_eq!(f.images.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_caption_failure_uses_placeholder() {
        let f = fixture_with(MuteCaptioner(MockProvider::new(DIM)));
        let receipt = f
            .pipeline
            .ingest(Path::new("/photos/y.jpg"), "y.jpg", "/uploads/y.jpg")
            .await
            .unwrap();
        assert_eq!(receipt.caption, PLACEHOLDER_CAPTION);
        assert_eq!(f.index.count(), 1);

        let record = f.images.find_by_id(receipt.id).unwrap().unwrap();
        assert_eq!(record.caption.as_deref(), Some(PLACEHOLDER_CAPTION));
    }

    #[tokio::test]
    async fn test_hydration_drops_deleted_records() {
        let f = fixture();
        let kept = f
            .pipeline
            .ingest(Path::new("/photos/keep.jpg"), "keep.jpg", "/u/keep.jpg")
            .await
            .unwrap();
        let dropped = f
            .pipeline
            .ingest(Path::new("/photos/drop.jpg"), "drop.jpg", "/u/drop.jpg")
            .await
            .unwrap();

        // Delete one record; its vector stays in the index.
        f.images.delete(dropped.id).unwrap();
        assert_eq!(f.index.count(), 2);

        let outcome = f.pipeline.search("/photos/keep.jpg", Some(5)).await;
        match outcome {
            SearchOutcome::Results(matches) => {
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].record.id, kept.id);
            }
            other => panic!("expected results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_scores_are_rounded() {
        let f = fixture();
        for i in 0..5 {
            f.pipeline
                .ingest(
                    Path::new(&format!("/photos/{}.jpg", i)),
                    &format!("{}.jpg", i),
                    &format!("/u/{}.jpg", i),
                )
                .await
                .unwrap();
        }

        let outcome = f.pipeline.search("holiday pictures", Some(5)).await;
        match outcome {
            SearchOutcome::Results(matches) => {
                assert!(!matches.is_empty());
                for m in &matches {
                    let rounded = (m.similarity * 1000.0).round() / 1000.0;
                    assert_eq!(m.similarity, rounded);
                }
            }
            other => panic!("expected results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_k_is_capped() {
        let f = fixture();
        for i in 0..8 {
            f.pipeline
                .ingest(
                    Path::new(&format!("/photos/{}.jpg", i)),
                    &format!("{}.jpg", i),
                    &format!("/u/{}.jpg", i),
                )
                .await
                .unwrap();
        }

        let pipeline = {
            // Rebuild with tight limits over the same index and store.
            SearchPipeline::new(
                Arc::clone(&f.index),
                MockProvider::new(DIM),
                Arc::clone(&f.images),
                f._dir.path().join("lumen.index"),
            )
            .with_limits(2, 3)
        };

        match pipeline.search("pictures", None).await {
            SearchOutcome::Results(matches) => assert_eq!(matches.len(), 2),
            other => panic!("expected results, got {:?}", other),
        }
        match pipeline.search("pictures", Some(100)).await {
            SearchOutcome::Results(matches) => assert_eq!(matches.len(), 3),
            other => panic!("expected results, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_snapshot_pair() {
        let f = fixture();
        f.pipeline
            .ingest(Path::new("/photos/a.jpg"), "a.jpg", "/u/a.jpg")
            .await
            .unwrap();

        let path = f._dir.path().join("lumen.index");
        assert!(path.exists());
        assert!(snapshot::mapping_path(&path).exists());

        let restored = snapshot::load(&path).unwrap();
        assert_eq!(restored.count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_pushes_to_remote_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(VectorIndex::new(DIM).unwrap());
        let images = Arc::new(ImageRepository::new(Arc::new(Database::in_memory().unwrap())));
        let transport = Arc::new(MockTransport::new());
        let pipeline = SearchPipeline::new(
            Arc::clone(&index),
            MockProvider::new(DIM),
            Arc::clone(&images),
            dir.path().join("lumen.index"),
        )
        .with_remote(RemoteSync::new(
            Arc::clone(&transport),
            "backups/lumen.index",
        ));

        pipeline
            .ingest(Path::new("/photos/b.jpg"), "b.jpg", "/u/b.jpg")
            .await
            .unwrap();

        assert!(transport.get("backups/lumen.index").is_some());
        assert!(transport.get("backups/lumen.index.mapping").is_some());
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.123_456), 0.123);
        assert_eq!(round3(0.999_9), 1.0);
        assert_eq!(round3(-0.000_4), 0.0);
    }
}
