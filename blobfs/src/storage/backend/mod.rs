//! The flat blob namespace the driver is built on.
//!
//! A backend only knows keys. Directories, path validation and the writer
//! lifecycle all live above this layer, in [`crate::storage::driver`].

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::BlobStoreError;

pub mod filesystem;
pub mod memory;

pub type StoreResult<T> = Result<T, BlobStoreError>;

/// Largest payload a single `put` call accepts unless the backend says otherwise.
pub const DEFAULT_MAX_PUT_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobType {
    Block,
    Append,
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlobType::Block => "block",
            BlobType::Append => "append",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobProperties {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub blob_type: BlobType,
}

/// One page of a prefix listing. `next_marker` is `None` on the final page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub keys: Vec<String>,
    pub next_marker: Option<String>,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Upper bound for a single [`BlobStore::put`] call.
    fn max_put_size(&self) -> u64 {
        DEFAULT_MAX_PUT_SIZE
    }

    /// Whether [`BlobStore::append_chunk`] accepts blobs of this type.
    fn appendable(&self, blob_type: BlobType) -> bool {
        blob_type == BlobType::Append
    }

    /// Initializes the container or namespace. Returns `true` if it was created.
    async fn create_if_absent(&self) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Reads from `offset` to the end of the blob.
    async fn get_range(&self, key: &str, offset: u64) -> StoreResult<Bytes> {
        let data = self.get(key).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        Ok(data.slice(start..))
    }

    /// Overwrites `key` with a block blob holding `data`.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    async fn properties(&self, key: &str) -> StoreResult<BlobProperties>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn delete_if_exists(&self, key: &str) -> StoreResult<bool> {
        match self.delete(key).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists keys starting with `prefix` in lexical order, resuming at `marker`.
    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        max_results: Option<usize>,
    ) -> StoreResult<ListingPage>;

    /// Creates an empty append blob at `key`, replacing any blob stored there.
    async fn create_append_blob(&self, key: &str) -> StoreResult<()>;

    async fn append_chunk(&self, key: &str, data: &[u8]) -> StoreResult<()>;

    async fn copy(&self, src: &str, dst: &str) -> StoreResult<()>;
}
