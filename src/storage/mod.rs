//! Result store for annotated images
//!
//! Artifacts are named `marked_<task_id>.<ext>` under a single root. Writes
//! for the same task id replace the previous artifact, so reprocessing a
//! redelivered task never produces a second file.

use crate::config::{StorageConfig, StorageProvider};
use async_trait::async_trait;
use object_store::{ObjectStore, path::Path as StoragePath};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid task id for storage key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write an artifact for `task_id` and return where it was stored
    async fn put(&self, task_id: &str, file_extension: &str, data: Vec<u8>) -> Result<String>;
}

/// File name of the annotated artifact for a task
pub fn artifact_name(task_id: &str, file_extension: &str) -> Result<String> {
    let valid = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(StorageError::InvalidKey(task_id.to_string()));
    }

    if file_extension.is_empty() {
        Ok(format!("marked_{task_id}"))
    } else {
        Ok(format!("marked_{task_id}.{file_extension}"))
    }
}

/// Build the store selected by configuration
pub fn from_config(config: &StorageConfig) -> Arc<dyn ResultStore> {
    match config.provider {
        StorageProvider::Local => Arc::new(LocalResultStore::new(config.root.clone())),
        StorageProvider::Memory => Arc::new(ObjectResultStore::in_memory()),
    }
}

/// Filesystem store rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalResultStore {
    root: PathBuf,
}

impl LocalResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl ResultStore for LocalResultStore {
    async fn put(&self, task_id: &str, file_extension: &str, data: Vec<u8>) -> Result<String> {
        let name = artifact_name(task_id, file_extension)?;

        tokio::fs::create_dir_all(&self.root).await?;

        // Write then rename; the artifact is replaced atomically. Each write
        // stages under its own name so concurrent puts of one task never share it.
        let path = self.root.join(&name);
        let staging = self.root.join(format!(".{name}.{}.partial", Uuid::new_v4().simple()));

        let written = match tokio::fs::write(&staging, &data).await {
            Ok(()) => tokio::fs::rename(&staging, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        tracing::info!(path = %path.display(), size = data.len(), "Artifact stored");

        Ok(path.display().to_string())
    }
}

/// Store wrapping any `object_store` backend
#[derive(Clone)]
pub struct ObjectResultStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectResultStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "marked")
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Read an artifact back by the key returned from `put`
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&StoragePath::from(key)).await?;
        Ok(result.bytes().await?.to_vec())
    }

    /// Number of stored artifacts
    pub async fn count(&self) -> Result<usize> {
        use futures::TryStreamExt;

        let prefix = (!self.prefix.is_empty()).then(|| StoragePath::from(self.prefix.as_str()));
        let objects: Vec<_> = self.store.list(prefix.as_ref()).try_collect().await?;
        Ok(objects.len())
    }
}

#[async_trait]
impl ResultStore for ObjectResultStore {
    async fn put(&self, task_id: &str, file_extension: &str, data: Vec<u8>) -> Result<String> {
        let key = self.key(&artifact_name(task_id, file_extension)?);
        let size = data.len();

        self.store.put(&StoragePath::from(key.as_str()), data.into()).await?;

        tracing::info!(key = %key, size, "Artifact stored");

        Ok(key)
    }
}
