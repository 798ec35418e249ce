//! In-memory vector index with brute-force inner-product search.
//!
//! All stored vectors are normalized to unit L2 norm at insertion, which
//! makes inner product equivalent to cosine similarity. Search is O(n) per
//! query, which is the right trade-off for personal-photo-library corpus
//! sizes (thousands of vectors, not billions).

use std::cmp::Ordering;
use std::sync::RwLock;

use lumen_core::error::LumenError;

/// A single hit returned from a vector query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// External image id owning the matched vector.
    pub id: i64,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f32,
}

/// Paired storage for vectors and their owning image ids.
///
/// Position `i` is the sole bridge between the two sequences: row `i` of
/// `vectors` belongs to `ids[i]`. The only mutation is `push`, which appends
/// to both, so the sequences cannot diverge.
#[derive(Debug, Clone)]
struct VectorRows {
    dimension: usize,
    vectors: Vec<f32>,
    ids: Vec<i64>,
}

impl VectorRows {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            ids: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn push(&mut self, vector: Vec<f32>, id: i64) {
        debug_assert_eq!(vector.len(), self.dimension);
        self.vectors.extend_from_slice(&vector);
        self.ids.push(id);
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }
}

/// Consistent point-in-time copy of the index contents.
///
/// Produced under the read lock so serialization and network pushes can
/// happen without blocking queries.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    /// Vector dimension.
    pub dimension: usize,
    /// Row-major normalized vectors, `dimension * ids.len()` floats.
    pub vectors: Vec<f32>,
    /// External ids, one per row, in insertion order.
    pub ids: Vec<i64>,
}

/// In-memory vector index over normalized embeddings.
///
/// Thread-safe via an interior RwLock: inserts are exclusive, queries run
/// concurrently with each other. Shared across request handlers behind an
/// `Arc`.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    rows: RwLock<VectorRows>,
}

impl VectorIndex {
    /// Create a new empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Result<Self, LumenError> {
        if dimension == 0 {
            return Err(LumenError::Config(
                "index dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            rows: RwLock::new(VectorRows::new(dimension)),
        })
    }

    /// Rebuild an index from a snapshot.
    ///
    /// Fails with `CorruptSnapshot` if the vector data does not pair up with
    /// the id sequence.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, LumenError> {
        if snapshot.dimension == 0 {
            return Err(LumenError::CorruptSnapshot(
                "snapshot has zero dimension".to_string(),
            ));
        }
        if snapshot.vectors.len() != snapshot.dimension * snapshot.ids.len() {
            return Err(LumenError::CorruptSnapshot(format!(
                "vector data holds {} floats but {} ids at dimension {} require {}",
                snapshot.vectors.len(),
                snapshot.ids.len(),
                snapshot.dimension,
                snapshot.dimension * snapshot.ids.len(),
            )));
        }
        Ok(Self {
            dimension: snapshot.dimension,
            rows: RwLock::new(VectorRows {
                dimension: snapshot.dimension,
                vectors: snapshot.vectors,
                ids: snapshot.ids,
            }),
        })
    }

    /// Normalize and append a vector for the given image id.
    ///
    /// On success the count increases by exactly one; on failure the index
    /// is unchanged. The id is appended under the same write lock as the
    /// vector, so a concurrent query never observes one without the other.
    pub fn insert(&self, vector: &[f32], id: i64) -> Result<(), LumenError> {
        let normalized = normalized(vector, self.dimension)?;
        let mut rows = self
            .rows
            .write()
            .map_err(|e| LumenError::Storage(format!("Index lock poisoned: {}", e)))?;
        rows.push(normalized, id);
        Ok(())
    }

    /// Return the k nearest neighbors to the query vector by inner product.
    ///
    /// Results are sorted by descending score; equal scores preserve
    /// insertion order (earlier-inserted wins). An empty index yields an
    /// empty result, not an error. Returns `min(k, count)` hits.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, LumenError> {
        if k == 0 {
            return Err(LumenError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let query = normalized(vector, self.dimension)?;

        let rows = self
            .rows
            .read()
            .map_err(|e| LumenError::Storage(format!("Index lock poisoned: {}", e)))?;

        let mut hits: Vec<SearchHit> = (0..rows.len())
            .map(|i| SearchHit {
                id: rows.ids[i],
                score: dot(&query, rows.row(i)),
            })
            .collect();

        // Stable sort: ties keep ascending insertion position.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(k);

        Ok(hits)
    }

    /// Current number of stored vectors.
    pub fn count(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Vector dimension this index was constructed with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Take a consistent copy of the index contents under the read lock.
    pub fn snapshot(&self) -> Result<IndexSnapshot, LumenError> {
        let rows = self
            .rows
            .read()
            .map_err(|e| LumenError::Storage(format!("Index lock poisoned: {}", e)))?;
        Ok(IndexSnapshot {
            dimension: rows.dimension,
            vectors: rows.vectors.clone(),
            ids: rows.ids.clone(),
        })
    }
}

/// Validate a vector and scale it to unit L2 norm.
fn normalized(vector: &[f32], dimension: usize) -> Result<Vec<f32>, LumenError> {
    if vector.len() != dimension {
        return Err(LumenError::InvalidVector(format!(
            "expected {} dimensions, got {}",
            dimension,
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(LumenError::InvalidVector(
            "vector contains non-finite components".to_string(),
        ));
    }

    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return Err(LumenError::InvalidVector(
            "zero vector cannot be normalized".to_string(),
        ));
    }

    let norm = norm as f32;
    Ok(vector.iter().map(|v| v / norm).collect())
}

/// Inner product of two equal-length vectors.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum::<f64>() as f32
}
