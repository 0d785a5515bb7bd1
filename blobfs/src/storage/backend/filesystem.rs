//! Flat blob store laid out on a local directory, one file per key.
//!
//! Keys containing `/` become nested directories below the container root.
//! Plain files accept appends however they were created, so every blob
//! reports itself as a block blob. A key cannot be both a blob and the
//! prefix of another blob's directory; such writes fail with an IO error.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use super::memory::DEFAULT_PAGE_SIZE;
use super::{BlobProperties, BlobStore, BlobType, ListingPage, StoreResult};
use crate::error::BlobStoreError;

pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// `storage_dir/container` becomes the root of the key space.
    pub fn new(storage_dir: impl AsRef<Path>, container: &str) -> Self {
        FilesystemBlobStore {
            root: storage_dir.as_ref().join(container),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn crate_path(&self, key: &str) -> io::Result<PathBuf> {
        let file_path = self.path_for(key);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(file_path)
    }

    /// Metadata of the file behind `key`. Directories do not count as blobs.
    async fn file_metadata(&self, key: &str) -> StoreResult<Metadata> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(not_found(key)),
            Err(err) => Err(map_io(key, err)),
        }
    }

    /// Removes empty directories left behind between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// All keys below the directory that holds `prefix`, unsorted.
    async fn collect_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let base = match prefix.rfind('/') {
            Some(idx) => prefix[..idx].to_string(),
            None => String::new(),
        };

        let mut keys = vec![];
        let mut pending = vec![base];
        while let Some(dir_key) = pending.pop() {
            let dir = if dir_key.is_empty() {
                self.root.clone()
            } else {
                self.path_for(&dir_key)
            };
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) if err.kind() == io::ErrorKind::NotADirectory => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let key = if dir_key.is_empty() {
                    name
                } else {
                    format!("{dir_key}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    pending.push(key);
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

fn not_found(key: &str) -> BlobStoreError {
    BlobStoreError::NotFound {
        key: key.to_string(),
    }
}

fn map_io(key: &str, err: io::Error) -> BlobStoreError {
    if err.kind() == io::ErrorKind::NotFound {
        not_found(key)
    } else {
        BlobStoreError::Io(err)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn appendable(&self, _blob_type: BlobType) -> bool {
        true
    }

    async fn create_if_absent(&self) -> StoreResult<bool> {
        if fs::metadata(&self.root).await.is_ok() {
            return Ok(false);
        }
        fs::create_dir_all(&self.root).await?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.file_metadata(key).await?;
        let data = fs::read(self.path_for(key))
            .await
            .map_err(|err| map_io(key, err))?;
        Ok(Bytes::from(data))
    }

    async fn get_range(&self, key: &str, offset: u64) -> StoreResult<Bytes> {
        let meta = self.file_metadata(key).await?;
        if offset >= meta.len() {
            return Ok(Bytes::new());
        }
        let mut file = fs::File::open(self.path_for(key))
            .await
            .map_err(|err| map_io(key, err))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity((meta.len() - offset) as usize);
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let path = self.crate_path(key).await?;
        let mut file = fs::File::create(path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn properties(&self, key: &str) -> StoreResult<BlobProperties> {
        let meta = self.file_metadata(key).await?;
        let modified = meta.modified().map(DateTime::<Utc>::from)?;
        Ok(BlobProperties {
            size: meta.len(),
            modified,
            blob_type: BlobType::Block,
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.file_metadata(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.file_metadata(key).await?;
        let path = self.path_for(key);
        fs::remove_file(&path)
            .await
            .map_err(|err| map_io(key, err))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        max_results: Option<usize>,
    ) -> StoreResult<ListingPage> {
        let limit = max_results.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let mut keys = self.collect_keys(prefix).await?;
        keys.sort();

        let start = match marker {
            Some(marker) => keys.partition_point(|key| key.as_str() < marker),
            None => 0,
        };
        let mut rest = keys.split_off(start).into_iter();
        let page: Vec<String> = rest.by_ref().take(limit).collect();
        Ok(ListingPage {
            keys: page,
            next_marker: rest.next(),
        })
    }

    async fn create_append_blob(&self, key: &str) -> StoreResult<()> {
        let path = self.crate_path(key).await?;
        fs::File::create(path).await?;
        Ok(())
    }

    async fn append_chunk(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        self.file_metadata(key).await?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.path_for(key))
            .await
            .map_err(|err| map_io(key, err))?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> StoreResult<()> {
        self.file_metadata(src).await?;
        let dst_path = self.crate_path(dst).await?;
        fs::copy(self.path_for(src), dst_path)
            .await
            .map_err(|err| map_io(src, err))?;
        Ok(())
    }
}
