//! Local filesystem object store implementation.
//!
//! Implements the `ObjectStore` trait from `docflow-core` with one file per
//! key under a root directory:
//!
//! ```text
//! {root}/
//!   inputs/{sha256}.pdf
//!   runs/{run_id}/extract/text
//!   runs/{run_id}/extract/image_0_2
//!   runs/{run_id}/ocr/0/text
//! ```
//!
//! Writes go to a temporary sibling file that is renamed over the target, so
//! a reader never observes a partially written object.

use std::path::{Component, Path, PathBuf};

use docflow_core::storage::ObjectStore;
use docflow_types::error::StorageError;
use docflow_types::workflow::BlobRef;
use uuid::Uuid;

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root, rejecting keys that could escape it.
    fn object_path(&self, key: &BlobRef) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.as_str());
        let is_safe = !key.as_str().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_safe {
            return Err(StorageError::InvalidKey(key.as_str().to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &BlobRef, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(format!("create {}: {e}", parent.display())))?;
        }

        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            Uuid::now_v7().simple()
        ));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError::Io(format!("write {}: {e}", tmp.display())))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io(format!("rename into {}: {e}", path.display())));
        }

        tracing::debug!(key = %key, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &BlobRef) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.as_str().to_string()),
            _ => StorageError::Io(format!("read {}: {e}", path.display())),
        })
    }
}
