//! Object store trait.
//!
//! A flat key -> bytes blob store. Keys are deterministic functions of the
//! run and step that produced them, so re-running a step overwrites its
//! previous output instead of leaving an orphaned copy.

use std::sync::Arc;

use dashmap::DashMap;
use docflow_types::error::StorageError;
use docflow_types::workflow::BlobRef;

/// Trait for blob storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `bytes` at `key`, replacing any previous object.
    fn put(
        &self,
        key: &BlobRef,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Read the object at `key`.
    fn get(
        &self,
        key: &BlobRef,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, StorageError>> + Send;
}

impl<T: ObjectStore> ObjectStore for Arc<T> {
    fn put(
        &self,
        key: &BlobRef,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send {
        (**self).put(key, bytes)
    }

    fn get(
        &self,
        key: &BlobRef,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, StorageError>> + Send {
        (**self).get(key)
    }
}

/// Object store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<BlobRef, Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: &BlobRef) -> bool {
        self.objects.contains_key(key)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &BlobRef, bytes: Vec<u8>) -> Result<(), StorageError> {
        if key.as_str().is_empty() {
            return Err(StorageError::InvalidKey(String::new()));
        }
        self.objects.insert(key.clone(), bytes);
        Ok(())
    }

    async fn get(&self, key: &BlobRef) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}
