//! In-memory blob store for local development and tests.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BlobProperties, BlobStore, BlobType, DEFAULT_MAX_PUT_SIZE, ListingPage, StoreResult};
use crate::error::BlobStoreError;

/// Page size used by Azure's List Blobs when no limit is given.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Vec<u8>,
    blob_type: BlobType,
    modified: DateTime<Utc>,
}

impl StoredBlob {
    fn new(data: Vec<u8>, blob_type: BlobType) -> Self {
        Self {
            data,
            blob_type,
            modified: Utc::now(),
        }
    }
}

pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    page_size: usize,
    max_put_size: u64,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            max_put_size: DEFAULT_MAX_PUT_SIZE,
        }
    }

    /// Caps every listing page, so small fixtures still paginate.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_put_size(mut self, max_put_size: u64) -> Self {
        self.max_put_size = max_put_size;
        self
    }

    /// Stores `data` as an append blob, the type older registries used for
    /// every small file.
    pub async fn insert_append_blob(&self, key: &str, data: &[u8]) {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), StoredBlob::new(data.to_vec(), BlobType::Append));
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

fn not_found(key: &str) -> BlobStoreError {
    BlobStoreError::NotFound {
        key: key.to_string(),
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn name(&self) -> &'static str {
        "inmemory"
    }

    fn max_put_size(&self) -> u64 {
        self.max_put_size
    }

    async fn create_if_absent(&self) -> StoreResult<bool> {
        Ok(false)
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let blobs = self.blobs.read().await;
        blobs
            .get(key)
            .map(|blob| Bytes::copy_from_slice(&blob.data))
            .ok_or_else(|| not_found(key))
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let mut blobs = self.blobs.write().await;
        blobs.insert(key.to_string(), StoredBlob::new(data.to_vec(), BlobType::Block));
        Ok(())
    }

    async fn properties(&self, key: &str) -> StoreResult<BlobProperties> {
        let blobs = self.blobs.read().await;
        blobs
            .get(key)
            .map(|blob| BlobProperties {
                size: blob.data.len() as u64,
                modified: blob.modified,
                blob_type: blob.blob_type,
            })
            .ok_or_else(|| not_found(key))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.write().await;
        blobs.remove(key).map(|_| ()).ok_or_else(|| not_found(key))
    }

    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        max_results: Option<usize>,
    ) -> StoreResult<ListingPage> {
        let limit = max_results.unwrap_or(self.page_size).clamp(1, self.page_size);
        let start = match marker {
            Some(marker) if marker > prefix => Bound::Included(marker.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let blobs = self.blobs.read().await;
        let mut matching = blobs
            .range::<String, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(limit).cloned().collect();
        // The marker names the first key of the next page.
        let next_marker = matching.next().cloned();
        Ok(ListingPage { keys, next_marker })
    }

    async fn create_append_blob(&self, key: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.write().await;
        blobs.insert(key.to_string(), StoredBlob::new(Vec::new(), BlobType::Append));
        Ok(())
    }

    async fn append_chunk(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.write().await;
        let blob = blobs.get_mut(key).ok_or_else(|| not_found(key))?;
        if !self.appendable(blob.blob_type) {
            return Err(BlobStoreError::NotAppendable {
                key: key.to_string(),
                blob_type: blob.blob_type,
            });
        }
        blob.data.extend_from_slice(data);
        blob.modified = Utc::now();
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.write().await;
        let source = blobs.get(src).cloned().ok_or_else(|| not_found(src))?;
        blobs.insert(dst.to_string(), StoredBlob::new(source.data, source.blob_type));
        Ok(())
    }
}
