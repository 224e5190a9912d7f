//! JSON persistence in the `.storage/` directory

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported version {found} for {key} (expected {expected})")]
    UnsupportedVersion {
        key: String,
        expected: u32,
        found: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Versioned envelope written to disk
///
/// ```json
/// { "version": 1, "minor_version": 1, "key": "core.config_entries", "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    #[serde(default = "default_minor_version")]
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

fn default_minor_version() -> u32 {
    1
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32) -> Self {
        Self {
            version,
            minor_version: 1,
            key: key.into(),
            data,
        }
    }
}

/// Handle on a config directory's `.storage/` folder
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load `key`, rejecting major versions other than `version`
    ///
    /// Returns `None` when nothing has been stored yet.
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        version: u32,
    ) -> StorageResult<Option<StorageFile<T>>> {
        let path = self.file_path(key);
        if !path.exists() {
            debug!(key, "Storage file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let file: StorageFile<T> = serde_json::from_str(&content)?;
        if file.version != version {
            return Err(StorageError::UnsupportedVersion {
                key: key.to_string(),
                expected: version,
                found: file.version,
            });
        }

        debug!(key, version = file.version, "Loaded storage file");
        Ok(Some(file))
    }

    /// Write atomically: temp file first, then rename over the target
    pub async fn save<T: Serialize>(&self, file: &StorageFile<T>) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
        }

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));

        fs::write(&temp_path, serde_json::to_string_pretty(file)?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = %file.key, "Saved storage file");
        Ok(())
    }
}
