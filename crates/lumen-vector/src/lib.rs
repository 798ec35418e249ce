//! Lumen vector crate - the similarity index and the pipelines around it.
//!
//! Provides the in-memory vector index with exact inner-product search,
//! snapshot persistence (vector blob + id mapping as a consistent pair),
//! remote snapshot mirroring over a blob transport, the embedding provider
//! trait with a mock implementation, and the search/ingest pipelines.

pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod snapshot;
pub mod sync;

pub use embedding::{EmbeddingProvider, MockProvider};
pub use index::{IndexSnapshot, SearchHit, VectorIndex};
pub use pipeline::{
    IngestFailure, IngestReceipt, IngestStage, RankedMatch, SearchOutcome, SearchPipeline,
};
pub use sync::{BlobTransport, DirTransport, MockTransport, RemoteSync};
