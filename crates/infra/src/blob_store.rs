//! Blob payload store.
//!
//! Broker messages have a size ceiling, so payloads are written to a
//! container under an opaque blob id and the message carries only the id.
//! Blobs are written once and deleted once.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob {container}/{blob_id} not found")]
    NotFound { container: String, blob_id: String },

    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download_byte_array(&self, container: &str, blob_id: &str) -> Result<Vec<u8>, BlobStoreError>;

    async fn does_exist(&self, container: &str, blob_id: &str) -> Result<bool, BlobStoreError>;

    async fn delete_blob(&self, container: &str, blob_id: &str) -> Result<(), BlobStoreError>;

    async fn upload_stream_data(
        &self,
        container: &str,
        blob_id: &str,
        data: Vec<u8>,
    ) -> Result<(), BlobStoreError>;
}

/// In-memory blob store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    inner: RwLock<HashMap<(String, String), Vec<u8>>>,
    unavailable: RwLock<HashSet<String>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: insert synchronously.
    pub fn put(&self, container: &str, blob_id: &str, data: impl Into<Vec<u8>>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((container.to_string(), blob_id.to_string()), data.into());
        }
    }

    pub fn contains(&self, container: &str, blob_id: &str) -> bool {
        self.inner
            .read()
            .map(|m| m.contains_key(&(container.to_string(), blob_id.to_string())))
            .unwrap_or(false)
    }

    pub fn blob_ids(&self, container: &str) -> Vec<String> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.keys()
            .filter(|(c, _)| c == container)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Every operation on `container` fails until [`Self::restore`] is called.
    pub fn make_unavailable(&self, container: &str) {
        if let Ok(mut set) = self.unavailable.write() {
            set.insert(container.to_string());
        }
    }

    pub fn restore(&self, container: &str) {
        if let Ok(mut set) = self.unavailable.write() {
            set.remove(container);
        }
    }

    fn check(&self, container: &str) -> Result<(), BlobStoreError> {
        let down = self
            .unavailable
            .read()
            .map_err(|_| BlobStoreError::Unavailable("lock poisoned".into()))?
            .contains(container);
        if down {
            return Err(BlobStoreError::Unavailable(format!("container {container} is unavailable")));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> BlobStoreError {
    BlobStoreError::Unavailable("lock poisoned".into())
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download_byte_array(&self, container: &str, blob_id: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.check(container)?;
        let map = self.inner.read().map_err(poisoned)?;
        map.get(&(container.to_string(), blob_id.to_string()))
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound {
                container: container.to_string(),
                blob_id: blob_id.to_string(),
            })
    }

    async fn does_exist(&self, container: &str, blob_id: &str) -> Result<bool, BlobStoreError> {
        self.check(container)?;
        Ok(self.contains(container, blob_id))
    }

    async fn delete_blob(&self, container: &str, blob_id: &str) -> Result<(), BlobStoreError> {
        self.check(container)?;
        let mut map = self.inner.write().map_err(poisoned)?;
        map.remove(&(container.to_string(), blob_id.to_string()));
        Ok(())
    }

    async fn upload_stream_data(
        &self,
        container: &str,
        blob_id: &str,
        data: Vec<u8>,
    ) -> Result<(), BlobStoreError> {
        self.check(container)?;
        let mut map = self.inner.write().map_err(poisoned)?;
        map.insert((container.to_string(), blob_id.to_string()), data);
        Ok(())
    }
}
