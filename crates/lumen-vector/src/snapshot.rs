//! Index snapshot persistence.
//!
//! A snapshot is a pair of artifacts written and read together: the vector
//! blob at `path` (version, dimension, row-major f32 data) and the id
//! mapping at `path + ".mapping"` (the external ids in insertion order).
//! Loading validates that the pair is consistent; a mapping that is missing
//! or disagrees with the vector blob would silently desynchronize index
//! positions from image ids, so it fails with `CorruptSnapshot` instead.

use std::path::{Path, PathBuf};

use tracing::info;

use lumen_core::error::LumenError;

use crate::index::{IndexSnapshot, VectorIndex};

/// Artifact format version. Bump on layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Upper bound on decoded artifact size (1 GiB).
const DECODE_LIMIT: usize = 1 << 30;

fn encode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

fn decode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
        .with_limit::<DECODE_LIMIT>()
}

/// Path of the id-mapping artifact for a given vector blob path.
pub fn mapping_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".mapping");
    PathBuf::from(os)
}

/// Return true if the vector blob exists locally.
pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Serialize the index to the snapshot pair at `path`.
///
/// The index is copied under its read lock; serialization and disk writes
/// happen outside it. The vector blob is written first; if the mapping write
/// then fails, the call fails and the now-stale vector blob stays on disk
/// until the next successful save overwrites it.
pub fn save(index: &VectorIndex, path: &Path) -> Result<(), LumenError> {
    let snapshot = index.snapshot()?;
    write_snapshot(&snapshot, path)
}

/// Write a pre-taken snapshot to the pair at `path`.
pub fn write_snapshot(snapshot: &IndexSnapshot, path: &Path) -> Result<(), LumenError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let blob = bincode::serde::encode_to_vec(
        (
            SNAPSHOT_VERSION,
            snapshot.dimension as u64,
            &snapshot.vectors,
        ),
        encode_config(),
    )
    .map_err(|e| LumenError::Serialization(format!("Failed to encode vector blob: {}", e)))?;

    let mapping = bincode::serde::encode_to_vec(&snapshot.ids, encode_config())
        .map_err(|e| LumenError::Serialization(format!("Failed to encode id mapping: {}", e)))?;

    std::fs::write(path, blob)?;
    std::fs::write(mapping_path(path), mapping)?;

    info!(
        path = %path.display(),
        vectors = snapshot.ids.len(),
        "Saved index snapshot"
    );
    Ok(())
}

/// Load an index from the snapshot pair at `path`.
///
/// A missing mapping artifact is tolerated only for an empty vector blob;
/// a non-empty blob without its mapping is an inconsistent pair and fails
/// with `CorruptSnapshot`.
pub fn load(path: &Path) -> Result<VectorIndex, LumenError> {
    let blob = std::fs::read(path)?;
    let (version, dimension, vectors) = decode::<(u32, u64, Vec<f32>)>(&blob, "vector blob")?;

    if version != SNAPSHOT_VERSION {
        return Err(LumenError::CorruptSnapshot(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    let dimension = dimension as usize;
    if dimension == 0 {
        return Err(LumenError::CorruptSnapshot(
            "vector blob has zero dimension".to_string(),
        ));
    }
    if vectors.len() % dimension != 0 {
        return Err(LumenError::CorruptSnapshot(format!(
            "vector data length {} is not a multiple of dimension {}",
            vectors.len(),
            dimension
        )));
    }
    let count = vectors.len() / dimension;

    let map_path = mapping_path(path);
    let ids: Vec<i64> = if map_path.exists() {
        let bytes = std::fs::read(&map_path)?;
        decode(&bytes, "id mapping")?
    } else if count == 0 {
        Vec::new()
    } else {
        return Err(LumenError::CorruptSnapshot(format!(
            "id mapping artifact missing at {} but vector blob holds {} vectors",
            map_path.display(),
            count
        )));
    };

    if ids.len() != count {
        return Err(LumenError::CorruptSnapshot(format!(
            "id mapping holds {} ids but vector blob holds {} vectors",
            ids.len(),
            count
        )));
    }

    info!(path = %path.display(), vectors = count, "Loaded index snapshot");

    VectorIndex::from_snapshot(IndexSnapshot {
        dimension,
        vectors,
        ids,
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, LumenError> {
    let (value, read) = bincode::serde::decode_from_slice::<T, _>(bytes, decode_config())
        .map_err(|e| LumenError::CorruptSnapshot(format!("Failed to decode {}: {}", what, e)))?;
    if read != bytes.len() {
        return Err(LumenError::CorruptSnapshot(format!(
            "{} has {} trailing bytes",
            what,
            bytes.len() - read
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 8;

    fn populated_index(count: usize) -> VectorIndex {
        let index = VectorIndex::new(DIM).unwrap();
        for i in 0..count {
            let mut v = vec![0.05f32; DIM];
            v[i % DIM] += (i + 1) as f32 * 0.2;
            index.insert(&v, 1000 + i as i64).unwrap();
        }
        index
    }

    #[test]
    fn test_save_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        save(&populated_index(3), &path).unwrap();

        assert!(path.exists());
        assert!(mapping_path(&path).exists());
    }

    #[test]
    fn test_roundtrip_preserves_count_ids_and_topk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        let index = populated_index(12);
        save(&index, &path).unwrap();
        let restored = load(&path).unwrap();

        assert_eq!(restored.count(), index.count());
        assert_eq!(
            restored.snapshot().unwrap().ids,
            index.snapshot().unwrap().ids
        );

        let probe = vec![0.4f32, 0.1, 0.0, 0.3, 0.2, 0.6, 0.1, 0.0];
        assert_eq!(
            restored.query(&probe, 5).unwrap(),
            index.query(&probe, 5).unwrap()
        );
    }

    #[test]
    fn test_roundtrip_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        save(&VectorIndex::new(DIM).unwrap(), &path).unwrap();
        let restored = load(&path).unwrap();
        assert_eq!(restored.count(), 0);
        assert_eq!(restored.dimension(), DIM);
    }

    #[test]
    fn test_missing_mapping_with_empty_blob_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        save(&VectorIndex::new(DIM).unwrap(), &path).unwrap();
        std::fs::remove_file(mapping_path(&path)).unwrap();

        let restored = load(&path).unwrap();
        assert_eq!(restored.count(), 0);
    }

    #[test]
    fn test_missing_mapping_with_nonempty_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        save(&populated_index(4), &path).unwrap();
        std::fs::remove_file(mapping_path(&path)).unwrap();

        let result = load(&path);
        assert!(matches!(result, Err(LumenError::CorruptSnapshot(_))));
    }

    #[test]
    fn test_mapping_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        save(&populated_index(4), &path).unwrap();

        // Overwrite the mapping with one id too many.
        let ids: Vec<i64> = vec![1, 2, 3, 4, 5];
        let bytes = bincode::serde::encode_to_vec(&ids, encode_config()).unwrap();
        std::fs::write(mapping_path(&path), bytes).unwrap();

        let result = load(&path);
        assert!(matches!(result, Err(LumenError::CorruptSnapshot(_))));
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        std::fs::write(&path, b"not a snapshot").unwrap();
        let result = load(&path);
        assert!(matches!(result, Err(LumenError::CorruptSnapshot(_))));
    }

    #[test]
    fn test_missing_blob_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(&dir.path().join("absent.index"));
        assert!(matches!(result, Err(LumenError::Io(_))));
    }

    #[test]
    fn test_concurrent_inserts_survive_roundtrip() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        let index = Arc::new(VectorIndex::new(DIM).unwrap());
        let mut handles = Vec::new();
        for id in 0..100i64 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                let mut v = vec![0.1f32; DIM];
                v[(id as usize) % DIM] += 1.0;
                index.insert(&v, id).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        save(&index, &path).unwrap();
        let restored = load(&path).unwrap();

        let snapshot = restored.snapshot().unwrap();
        assert_eq!(snapshot.ids.len(), 100);
        assert_eq!(snapshot.vectors.len(), 100 * DIM);

        let mut ids = snapshot.ids;
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_mapping_path_suffix() {
        assert_eq!(
            mapping_path(Path::new("/data/lumen.index")),
            PathBuf::from("/data/lumen.index.mapping")
        );
    }
}
