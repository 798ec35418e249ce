//! Embedding provider trait and implementations.
//!
//! An EmbeddingProvider is a CLIP-style dual encoder plus a captioner:
//! images and text map into the same vector space, and images additionally
//! get a natural-language caption. Inference happens out of process (or at
//! least outside this crate); everything here talks to it through this
//! trait. `MockProvider` supplies deterministic hash-based vectors so the
//! pipeline and API can be exercised without a model.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;

use tracing::debug;

use lumen_core::error::{LumenError, Result};

/// Service producing embeddings and captions for the search pipeline.
///
/// `image_to_vector` and `text_to_vector` must map into the same space for
/// natural-language photo queries to work. Failures surface as `Upstream`
/// and are fatal only to the single operation in flight.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed an image file.
    fn image_to_vector(&self, path: &Path) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed a text query into the same space as images.
    fn text_to_vector(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Generate a caption for an image file.
    fn image_to_caption(&self, path: &Path) -> impl Future<Output = Result<String>> + Send;

    /// Dimensionality of vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Object-safe version of [`EmbeddingProvider`] for dynamic dispatch.
///
/// `EmbeddingProvider` methods return `impl Future` and are therefore not
/// object-safe. This twin uses boxed futures so a `Box<dyn
/// DynEmbeddingProvider>` can live in structs without generics. A blanket
/// implementation covers every `EmbeddingProvider`.
pub trait DynEmbeddingProvider: Send + Sync {
    fn image_to_vector_boxed<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn text_to_vector_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn image_to_caption_boxed<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn dimension(&self) -> usize;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn image_to_vector_boxed<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.image_to_vector(path))
    }

    fn text_to_vector_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.text_to_vector(text))
    }

    fn image_to_caption_boxed<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.image_to_caption(path))
    }

    fn dimension(&self) -> usize {
        EmbeddingProvider::dimension(self)
    }
}

/// Run an async operation up to `attempts` times, returning the first
/// success or the last error.
///
/// Model calls flake; call sites wrap them in this instead of growing their
/// own retry loops.
pub async fn with_retries<T, F, Fut>(attempts: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt, attempts, error = %e, "Retryable operation failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LumenError::Upstream("no attempts made".to_string())))
}

// ---------------------------------------------------------------------------
// MockProvider - deterministic hash-based vectors
// ---------------------------------------------------------------------------

/// Mock provider returning deterministic unit vectors derived from a hash
/// of the input, so identical inputs always embed identically. Captions are
/// templated from the filename. Lets search and ingest be tested end to end
/// without a model process.
#[derive(Debug, Clone)]
pub struct MockProvider {
    dimension: usize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(512)
    }
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_to_vector(&self, seed: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // Unit-normalize to match what a real encoder emits.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingProvider for MockProvider {
    async fn image_to_vector(&self, path: &Path) -> Result<Vec<f32>> {
        Ok(self.hash_to_vector(&path.display().to_string()))
    }

    async fn text_to_vector(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(LumenError::Upstream("cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    async fn image_to_caption(&self, path: &Path) -> Result<String> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        Ok(format!("a photo of {}", stem))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
