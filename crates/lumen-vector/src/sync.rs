//! Remote snapshot mirroring over a blob transport.
//!
//! The transport is a narrow interface to whatever durable store the
//! deployment uses. RemoteSync orchestrates it for exactly two moments:
//! cold start (fetch a missing snapshot pair before falling back to an
//! empty index) and after a local save (best-effort push). A remote failure
//! is never fatal; the local snapshot is the hard durability guarantee.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, info};

use lumen_core::error::{LumenError, Result};

use crate::snapshot;

/// Blob store client interface.
///
/// Implementations move opaque bytes under string keys. Errors surface as
/// `Transport`, which callers treat as "remote unavailable".
pub trait BlobTransport: Send + Sync {
    /// Store bytes under a key; returns the stored object's location.
    fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Fetch a key into a local file.
    fn download(
        &self,
        key: &str,
        local_path: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Check whether a key exists remotely.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Object-safe version of [`BlobTransport`] for dynamic dispatch.
///
/// A blanket implementation is provided so every `BlobTransport`
/// automatically implements `DynBlobTransport`.
pub trait DynBlobTransport: Send + Sync {
    fn upload_boxed<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn download_boxed<'a>(
        &'a self,
        key: &'a str,
        local_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn exists_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

impl<T: BlobTransport> BlobTransport for std::sync::Arc<T> {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        self.as_ref().upload(key, bytes).await
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        self.as_ref().download(key, local_path).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.as_ref().exists(key).await
    }
}

impl<T: BlobTransport> DynBlobTransport for T {
    fn upload_boxed<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.upload(key, bytes))
    }

    fn download_boxed<'a>(
        &'a self,
        key: &'a str,
        local_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.download(key, local_path))
    }

    fn exists_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.exists(key))
    }
}

/// Mirrors the snapshot pair to a remote store under a configured key.
pub struct RemoteSync {
    transport: Box<dyn DynBlobTransport>,
    key: String,
}

impl RemoteSync {
    /// Create a sync handle for the given transport and remote key. The id
    /// mapping is mirrored under `key + ".mapping"`.
    pub fn new(transport: impl BlobTransport + 'static, key: impl Into<String>) -> Self {
        Self {
            transport: Box::new(transport),
            key: key.into(),
        }
    }

    fn mapping_key(&self) -> String {
        format!("{}.mapping", self.key)
    }

    /// Fetch the remote snapshot pair into the local paths.
    ///
    /// Returns Ok(false) when nothing exists under the key. A partial fetch
    /// (one artifact only) removes whatever landed locally and fails, so the
    /// caller never loads an inconsistent pair.
    pub async fn fetch(&self, path: &Path) -> Result<bool> {
        if !self.transport.exists_boxed(&self.key).await? {
            debug!(key = %self.key, "No remote snapshot to fetch");
            return Ok(false);
        }

        self.transport.download_boxed(&self.key, path).await?;

        let map_path = snapshot::mapping_path(path);
        let mapping_key = self.mapping_key();
        if let Err(e) = self
            .transport
            .download_boxed(&mapping_key, &map_path)
            .await
        {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(&map_path);
            return Err(LumenError::Transport(format!(
                "remote snapshot pair incomplete, discarding partial fetch: {}",
                e
            )));
        }

        info!(key = %self.key, "Fetched index snapshot from remote store");
        Ok(true)
    }

    /// Push the local snapshot pair to the remote store.
    ///
    /// Callers treat failures as "remote unavailable" and log them; the
    /// local save has already succeeded.
    pub async fn push(&self, path: &Path) -> Result<()> {
        let blob = read_local(path).await?;
        let mapping = read_local(&snapshot::mapping_path(path)).await?;

        self.transport.upload_boxed(&self.key, blob).await?;
        self.transport
            .upload_boxed(&self.mapping_key(), mapping)
            .await?;

        info!(key = %self.key, "Pushed index snapshot to remote store");
        Ok(())
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        LumenError::Transport(format!(
            "cannot read local artifact {}: {}",
            path.display(),
            e
        ))
    })
}

/// Filesystem-backed transport: a mounted or synced directory acts as the
/// remote store. The deployment default when no object store is wired in.
pub struct DirTransport {
    root: PathBuf,
}

impl DirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobTransport for DirTransport {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let target = self.target(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LumenError::Transport(e.to_string()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| LumenError::Transport(e.to_string()))?;
        Ok(target.display().to_string())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let source = self.target(key);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LumenError::Transport(e.to_string()))?;
        }
        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| LumenError::Transport(format!("download {}: {}", key, e)))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.target(key).exists())
    }
}

/// In-memory transport for tests.
#[derive(Default)]
pub struct MockTransport {
    objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing upload.
    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .expect("mock transport lock")
            .insert(key.to_string(), bytes);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("mock transport lock")
            .get(key)
            .cloned()
    }
}

impl BlobTransport for MockTransport {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        self.put(key, bytes);
        Ok(format!("mock://{}", key))
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = self
            .get(key)
            .ok_or_else(|| LumenError::Transport(format!("no such key: {}", key)))?;
        std::fs::write(local_path, bytes).map_err(|e| LumenError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .lock()
            .expect("mock transport lock")
            .contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;

    const DIM: usize = 8;

    fn saved_snapshot(dir: &Path) -> PathBuf {
        let path = dir.join("photos.index");
        let index = VectorIndex::new(DIM).unwrap();
        let mut v = vec![0.1f32; DIM];
        v[0] = 1.0;
        index.insert(&v, 7).unwrap();
        snapshot::save(&index, &path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_push_then_fetch_roundtrip() {
        use std::sync::Arc;

        let local = tempfile::tempdir().unwrap();
        let path = saved_snapshot(local.path());

        let transport = Arc::new(MockTransport::new());
        let sync = RemoteSync::new(Arc::clone(&transport), "backups/photos.index");
        sync.push(&path).await.unwrap();

        assert!(transport.get("backups/photos.index").is_some());
        assert!(transport.get("backups/photos.index.mapping").is_some());

        // Fresh machine: fetch the pair from the same store and load it.
        let cold = tempfile::tempdir().unwrap();
        let cold_path = cold.path().join("photos.index");
        let sync2 = RemoteSync::new(Arc::clone(&transport), "backups/photos.index");

        assert!(sync2.fetch(&cold_path).await.unwrap());
        let restored = snapshot::load(&cold_path).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.snapshot().unwrap().ids, vec![7]);
    }

    #[tokio::test]
    async fn test_fetch_returns_false_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let sync = RemoteSync::new(MockTransport::new(), "backups/photos.index");
        let fetched = sync.fetch(&dir.path().join("photos.index")).await.unwrap();
        assert!(!fetched);
    }

    #[tokio::test]
    async fn test_partial_fetch_cleans_up_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.index");

        // Remote holds the vector blob but not the mapping.
        let transport = MockTransport::new();
        transport.put("backups/photos.index", vec![1, 2, 3]);
        let sync = RemoteSync::new(transport, "backups/photos.index");

        let result = sync.fetch(&path).await;
        assert!(matches!(result, Err(LumenError::Transport(_))));
        assert!(!path.exists());
        assert!(!snapshot::mapping_path(&path).exists());
    }

    #[tokio::test]
    async fn test_push_missing_local_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sync = RemoteSync::new(MockTransport::new(), "backups/photos.index");
        let result = sync.push(&dir.path().join("absent.index")).await;
        assert!(matches!(result, Err(LumenError::Transport(_))));
    }

    #[tokio::test]
    async fn test_dir_transport_roundtrip() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();

        let transport = DirTransport::new(remote.path());
        let url = transport
            .upload("backups/blob.bin", vec![9, 9, 9])
            .await
            .unwrap();
        assert!(url.contains("blob.bin"));
        assert!(transport.exists("backups/blob.bin").await.unwrap());
        assert!(!transport.exists("backups/other.bin").await.unwrap());

        let dest = local.path().join("blob.bin");
        transport.download("backups/blob.bin", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn test_dir_transport_download_missing_key() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();

        let transport = DirTransport::new(remote.path());
        let result = transport
            .download("backups/absent.bin", &local.path().join("x"))
            .await;
        assert!(matches!(result, Err(LumenError::Transport(_))));
    }
}
