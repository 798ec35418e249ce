use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata record for one stored photo.
///
/// The `id` is assigned by the metadata store and is the stable external
/// identifier the vector index maps positions onto.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Row id from the metadata store.
    pub id: i64,
    /// Original filename as uploaded.
    pub filename: String,
    /// Where the image bytes live (object-store URL or local path).
    pub storage_url: String,
    /// Generated caption. None when the record predates captioning.
    pub caption: Option<String>,
    /// Upload timestamp.
    pub uploaded_at: DateTime<Utc>,
}
