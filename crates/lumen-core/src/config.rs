use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LumenError, Result};

/// Top-level configuration for the Lumen photo-search service.
///
/// Loaded from `~/.lumen/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LumenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl LumenConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LumenConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LumenError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject configurations the index or pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.search.embedding_dim == 0 {
            return Err(LumenError::Config(
                "search.embedding_dim must be greater than zero".to_string(),
            ));
        }
        if self.search.default_k == 0 {
            return Err(LumenError::Config(
                "search.default_k must be greater than zero".to_string(),
            ));
        }
        if self.index.remote_key.is_some() && self.index.remote_dir.is_none() {
            return Err(LumenError::Config(
                "index.remote_key requires index.remote_dir".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and index snapshots.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
    /// Origins allowed to call the API (the gallery frontend).
    pub frontend_origins: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.lumen/data".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            frontend_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

/// Search and embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Embedding model name (CLIP-style dual encoder).
    pub embedding_model: String,
    /// Embedding dimension. CLIP ViT-B-32 produces 512-dimensional vectors.
    pub embedding_dim: usize,
    /// Default number of results per query.
    pub default_k: usize,
    /// Maximum number of results a caller may request.
    pub max_k: usize,
    /// Retry attempts for embedding/caption model calls.
    pub model_retries: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            embedding_model: "clip-ViT-B-32".to_string(),
            embedding_dim: 512,
            default_k: 5,
            max_k: 50,
            model_retries: 2,
        }
    }
}

/// Vector index snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Snapshot filename inside the data directory. The id mapping lives
    /// alongside it at `<filename>.mapping`.
    pub filename: String,
    /// Remote key to mirror the snapshot pair under. None disables sync.
    pub remote_key: Option<String>,
    /// Root of the remote mirror (a mounted or synced directory).
    pub remote_dir: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            filename: "lumen.index".to_string(),
            remote_key: None,
            remote_dir: None,
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database filename inside the data directory.
    pub db_filename: String,
    /// Maximum images returned by the listing endpoint.
    pub list_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_filename: "lumen.db".to_string(),
            list_limit: 100,
        }
    }
}
