use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::listing::{ListPager, direct_descendants, list_blobs};
use super::path_error;
use super::writer::ChunkedWriter;
use crate::config::DriverConfig;
use crate::error::{BlobStoreError, DriverError, Result};
use crate::storage::backend::{BlobStore, BlobType};
use crate::storage::paths::{PathMapper, validate_path, validate_path_or_root};
use crate::storage::walk::walk_fallback;
use crate::storage::{BlobReader, FileInfo, FileWriter, StorageDriver, WalkFn};

/// Virtual filesystem over a flat [`BlobStore`].
///
/// Directories are inferred from key prefixes, and uploads go through a
/// [`ChunkedWriter`] that appends to an append blob.
pub struct BlobDriver {
    store: Arc<dyn BlobStore>,
    path_mapper: PathMapper,
    max_chunk_size: usize,
}

impl BlobDriver {
    /// Builds a driver and makes sure the backing container exists.
    pub async fn new(store: Arc<dyn BlobStore>, config: &DriverConfig) -> Result<Self> {
        if store.create_if_absent().await? {
            info!(backend = store.name(), container = %config.container, "created container");
        }
        Ok(BlobDriver {
            store,
            path_mapper: PathMapper::new(&config.root_directory),
            max_chunk_size: config.max_chunk_size,
        })
    }

    fn blob_key(&self, path: &str) -> String {
        self.path_mapper.map(path)
    }

    /// Removes a blob whose type cannot be overwritten by a single put.
    ///
    /// Older uploads left append blobs behind, and a block-blob put cannot
    /// replace them atomically. Between this delete and the following put the
    /// path is empty; if the put then fails, the old content is gone. Clients
    /// are expected to retry the upload.
    async fn replace_legacy_blob(&self, path: &str, key: &str, blob_type: BlobType) -> Result<()> {
        info!(%path, %blob_type, "deleting legacy blob before overwrite");
        self.store
            .delete(key)
            .await
            .map_err(|source| DriverError::LegacyTypeConflict {
                path: path.to_string(),
                blob_type,
                source,
            })
    }

    /// Opens a writer on `path`, concretely typed.
    ///
    /// Resuming needs a blob the backend can append to. A blob stored with
    /// `put_content` is rejected here with `NotAppendable` on backends that
    /// distinguish blob types.
    pub async fn open_writer(&self, path: &str, append: bool) -> Result<ChunkedWriter> {
        validate_path(path)?;
        let key = self.blob_key(path);

        let mut size = 0;
        if self.store.exists(&key).await? {
            if append {
                let props = self
                    .store
                    .properties(&key)
                    .await
                    .map_err(|err| path_error(path, err))?;
                if !self.store.appendable(props.blob_type) {
                    return Err(BlobStoreError::NotAppendable {
                        key,
                        blob_type: props.blob_type,
                    }
                    .into());
                }
                size = props.size;
            } else {
                self.store
                    .delete(&key)
                    .await
                    .map_err(|err| path_error(path, err))?;
                self.store.create_append_blob(&key).await?;
            }
        } else if append {
            return Err(DriverError::not_found(path));
        } else {
            self.store.create_append_blob(&key).await?;
        }

        debug!(%path, append, size, "opened writer");
        Ok(ChunkedWriter::new(
            self.store.clone(),
            path,
            key,
            size,
            self.max_chunk_size,
        ))
    }
}

#[async_trait::async_trait]
impl StorageDriver for BlobDriver {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        validate_path(path)?;
        debug!(%path, "get content");
        self.store
            .get(&self.blob_key(path))
            .await
            .map_err(|err| path_error(path, err))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        validate_path(path)?;
        let size = content.len() as u64;
        let limit = self.store.max_put_size();
        if size > limit {
            return Err(DriverError::SizeLimitExceeded { size, limit });
        }

        let key = self.blob_key(path);
        match self.store.properties(&key).await {
            Ok(props) if props.blob_type != BlobType::Block => {
                self.replace_legacy_blob(path, &key, props.blob_type).await?;
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        debug!(%path, size, "put content");
        self.store.put(&key, content).await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<BlobReader> {
        validate_path(path)?;
        let key = self.blob_key(path);
        let props = self
            .store
            .properties(&key)
            .await
            .map_err(|err| path_error(path, err))?;

        if offset >= props.size {
            return Ok(Box::new(Cursor::new(Bytes::new())));
        }
        let data = self
            .store
            .get_range(&key, offset)
            .await
            .map_err(|err| path_error(path, err))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        Ok(Box::new(self.open_writer(path, append).await?))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        validate_path_or_root(path)?;
        if path == "/" {
            return Ok(FileInfo::Directory {
                path: path.to_string(),
            });
        }

        let key = self.blob_key(path);
        match self.store.properties(&key).await {
            Ok(props) => {
                return Ok(FileInfo::File {
                    path: path.to_string(),
                    size: props.size,
                    modified: props.modified,
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        // Not a blob; one key below it is enough to make it a directory.
        let mut pager = ListPager::new(self.store.as_ref(), format!("{key}/")).with_max_results(1);
        match pager.next_page().await? {
            Some(keys) if !keys.is_empty() => Ok(FileInfo::Directory {
                path: path.to_string(),
            }),
            _ => Err(DriverError::not_found(path)),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        validate_path_or_root(path)?;
        let prefix = if path == "/" { "" } else { path };

        let blobs = list_blobs(self.store.as_ref(), &self.path_mapper, prefix).await?;
        let list = direct_descendants(&blobs, prefix);
        if !prefix.is_empty() && list.is_empty() {
            return Err(DriverError::not_found(path));
        }
        Ok(list)
    }

    async fn move_path(&self, source_path: &str, dest_path: &str) -> Result<()> {
        validate_path(source_path)?;
        validate_path(dest_path)?;
        let source_key = self.blob_key(source_path);
        let dest_key = self.blob_key(dest_path);

        if source_key == dest_key {
            self.store
                .properties(&source_key)
                .await
                .map_err(|err| path_error(source_path, err))?;
            debug!(path = %source_path, "move onto itself");
            return Ok(());
        }

        self.store
            .copy(&source_key, &dest_key)
            .await
            .map_err(|err| path_error(source_path, err))?;
        // A failure past this point leaves both copies in place.
        self.store
            .delete(&source_key)
            .await
            .map_err(|err| path_error(source_path, err))?;

        debug!(source = %source_path, dest = %dest_path, "moved blob");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        if self.store.delete_if_exists(&self.blob_key(path)).await? {
            debug!(%path, "deleted blob");
            return Ok(());
        }

        // Not a blob, see if it is a virtual directory with blobs below it.
        let blobs = list_blobs(self.store.as_ref(), &self.path_mapper, path).await?;
        if blobs.is_empty() {
            return Err(DriverError::not_found(path));
        }
        for blob in &blobs {
            self.store
                .delete(&self.blob_key(blob))
                .await
                .map_err(|err| path_error(blob, err))?;
        }
        info!(%path, deleted = blobs.len(), "deleted virtual directory");
        Ok(())
    }

    async fn walk(&self, path: &str, visitor: &mut WalkFn<'_>) -> Result<()> {
        validate_path_or_root(path)?;
        walk_fallback(self, path, visitor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WalkControl;
    use crate::storage::backend::memory::InMemoryBlobStore;
    use crate::storage::backend::{BlobProperties, ListingPage, StoreResult};
    use tokio::io::AsyncReadExt;

    async fn driver_with(store: Arc<dyn BlobStore>, root: &str, chunk: usize) -> BlobDriver {
        let config = DriverConfig::new("registry")
            .with_root_directory(root)
            .with_max_chunk_size(chunk);
        BlobDriver::new(store, &config).await.unwrap()
    }

    async fn memory_driver(root: &str) -> (Arc<InMemoryBlobStore>, BlobDriver) {
        let store = Arc::new(InMemoryBlobStore::new().with_page_size(3));
        let driver = driver_with(store.clone(), root, 4).await;
        (store, driver)
    }

    #[tokio::test]
    async fn test_content_round_trip_under_root() {
        let (store, driver) = memory_driver("/docker/").await;
        driver
            .put_content("/a/b", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert_eq!(store.keys().await, vec!["docker/a/b"]);
        assert_eq!(driver.get_content("/a/b").await.unwrap(), Bytes::from_static(b"hi"));
        assert!(driver.get_content("/a/c").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_paths_never_reach_the_store() {
        let (store, driver) = memory_driver("").await;
        for path in ["", "a", "/a/", "/a//b", "/a/../b"] {
            assert!(matches!(
                driver.put_content(path, Bytes::new()).await,
                Err(DriverError::InvalidPath { .. })
            ));
        }
        assert!(matches!(
            driver.get_content("/").await,
            Err(DriverError::InvalidPath { .. })
        ));
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_put_content_over_limit_is_rejected_before_io() {
        let store = Arc::new(InMemoryBlobStore::new().with_max_put_size(4));
        let driver = driver_with(store.clone(), "", 4).await;

        let err = driver
            .put_content("/big", Bytes::from_static(b"12345"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::SizeLimitExceeded { size: 5, limit: 4 }
        ));
        assert!(store.keys().await.is_empty());
        driver
            .put_content("/small", Bytes::from_static(b"1234"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_content_replaces_legacy_append_blob() {
        let (store, driver) = memory_driver("").await;
        store.insert_append_blob("legacy", b"old").await;

        driver
            .put_content("/legacy", Bytes::from_static(b"new"))
            .await
            .unwrap();
        let props = store.properties("legacy").await.unwrap();
        assert_eq!(props.blob_type, BlobType::Block);
        assert_eq!(store.get("legacy").await.unwrap(), Bytes::from_static(b"new"));
    }

    /// Accepts deletes but rejects every put.
    struct PutFailsStore(InMemoryBlobStore);

    #[async_trait::async_trait]
    impl BlobStore for PutFailsStore {
        fn name(&self) -> &'static str {
            "putfails"
        }
        async fn create_if_absent(&self) -> StoreResult<bool> {
            Ok(false)
        }
        async fn get(&self, key: &str) -> StoreResult<Bytes> {
            self.0.get(key).await
        }
        async fn put(&self, _key: &str, _data: Bytes) -> StoreResult<()> {
            Err(BlobStoreError::Backend("put rejected".to_string()))
        }
        async fn properties(&self, key: &str) -> StoreResult<BlobProperties> {
            self.0.properties(key).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.0.exists(key).await
        }
        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.0.delete(key).await
        }
        async fn list_page(
            &self,
            prefix: &str,
            marker: Option<&str>,
            max_results: Option<usize>,
        ) -> StoreResult<ListingPage> {
            self.0.list_page(prefix, marker, max_results).await
        }
        async fn create_append_blob(&self, key: &str) -> StoreResult<()> {
            self.0.create_append_blob(key).await
        }
        async fn append_chunk(&self, key: &str, data: &[u8]) -> StoreResult<()> {
            self.0.append_chunk(key, data).await
        }
        async fn copy(&self, src: &str, dst: &str) -> StoreResult<()> {
            self.0.copy(src, dst).await
        }
    }

    #[tokio::test]
    async fn test_failed_put_after_legacy_delete_loses_old_content() {
        let inner = InMemoryBlobStore::new();
        inner.insert_append_blob("legacy", b"old").await;
        let driver = driver_with(Arc::new(PutFailsStore(inner)), "", 4).await;

        let err = driver
            .put_content("/legacy", Bytes::from_static(b"new"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Backend(BlobStoreError::Backend(_))));
        // The replacement window is not atomic: the old blob is already gone.
        assert!(driver.stat("/legacy").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reader_honours_offset() {
        let (_store, driver) = memory_driver("").await;
        driver
            .put_content("/f", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let mut out = String::new();
        driver
            .reader("/f", 2)
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "llo");

        let mut past_end = vec![];
        driver
            .reader("/f", 5)
            .await
            .unwrap()
            .read_to_end(&mut past_end)
            .await
            .unwrap();
        assert!(past_end.is_empty());
        assert!(matches!(driver.reader("/nope", 0).await, Err(err) if err.is_not_found()));
    }

    #[tokio::test]
    async fn test_writer_open_modes() {
        let (_store, driver) = memory_driver("").await;
        assert!(matches!(driver.writer("/up", true).await, Err(err) if err.is_not_found()));

        let mut writer = driver.writer("/up", false).await.unwrap();
        writer.write(b"0123456789").await.unwrap();
        writer.commit().await.unwrap();
        writer.close().await.unwrap();

        let mut resumed = driver.writer("/up", true).await.unwrap();
        assert_eq!(resumed.size(), 10);
        resumed.write(b"ab").await.unwrap();
        assert_eq!(resumed.size(), 12);
        resumed.commit().await.unwrap();
        resumed.close().await.unwrap();
        assert_eq!(driver.stat("/up").await.unwrap().size(), 12);

        let fresh = driver.writer("/up", false).await.unwrap();
        assert_eq!(fresh.size(), 0);
        assert_eq!(driver.stat("/up").await.unwrap().size(), 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_blob() {
        let (_store, driver) = memory_driver("").await;
        let mut writer = driver.writer("/up", false).await.unwrap();
        writer.write(b"0123456").await.unwrap();
        writer.cancel().await.unwrap();
        writer.close().await.unwrap();
        assert!(driver.stat("/up").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stat_list_and_delete_virtual_directory() {
        let (_store, driver) = memory_driver("").await;
        driver
            .put_content("/a/b", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert_eq!(
            driver.stat("/a").await.unwrap(),
            FileInfo::Directory {
                path: "/a".to_string()
            }
        );
        assert_eq!(driver.stat("/a/b").await.unwrap().size(), 2);
        assert!(driver.stat("/").await.unwrap().is_dir());
        assert_eq!(driver.list("/a").await.unwrap(), vec!["/a/b"]);

        driver.delete("/a").await.unwrap();
        assert!(driver.stat("/a").await.unwrap_err().is_not_found());
        assert!(driver.delete("/a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_root_and_missing() {
        let (_store, driver) = memory_driver("/root").await;
        assert!(driver.list("/").await.unwrap().is_empty());
        assert!(driver.list("/missing").await.unwrap_err().is_not_found());

        for path in ["/foo", "/bar/1", "/bar/2", "/bar/baz/3", "/qux/4"] {
            driver.put_content(path, Bytes::from_static(b"x")).await.unwrap();
        }
        assert_eq!(driver.list("/").await.unwrap(), vec!["/bar", "/foo", "/qux"]);
        assert_eq!(
            driver.list("/bar").await.unwrap(),
            vec!["/bar/1", "/bar/2", "/bar/baz"]
        );
    }

    #[tokio::test]
    async fn test_delete_does_not_touch_name_siblings() {
        let (store, driver) = memory_driver("").await;
        for path in ["/dir/1", "/dir/sub/2", "/dirx"] {
            driver.put_content(path, Bytes::from_static(b"x")).await.unwrap();
        }
        driver.delete("/dir").await.unwrap();
        assert_eq!(store.keys().await, vec!["dirx"]);
    }

    #[tokio::test]
    async fn test_move() {
        let (_store, driver) = memory_driver("").await;
        driver
            .put_content("/src", Bytes::from_static(b"data"))
            .await
            .unwrap();
        driver.move_path("/src", "/dst/file").await.unwrap();

        assert!(driver.stat("/src").await.unwrap_err().is_not_found());
        assert_eq!(
            driver.get_content("/dst/file").await.unwrap(),
            Bytes::from_static(b"data")
        );

        let err = driver.move_path("/src", "/elsewhere").await.unwrap_err();
        assert!(matches!(err, DriverError::PathNotFound { path } if path == "/src"));
    }

    #[tokio::test]
    async fn test_move_onto_itself_keeps_content() {
        let (store, driver) = memory_driver("/root").await;
        driver
            .put_content("/a", Bytes::from_static(b"data"))
            .await
            .unwrap();

        driver.move_path("/a", "/a").await.unwrap();
        assert_eq!(store.keys().await, vec!["root/a"]);
        assert_eq!(
            driver.get_content("/a").await.unwrap(),
            Bytes::from_static(b"data")
        );
        assert!(driver.move_path("/gone", "/gone").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_append_to_block_blob_is_rejected_on_open() {
        let (_store, driver) = memory_driver("").await;
        driver
            .put_content("/blk", Bytes::from_static(b"data"))
            .await
            .unwrap();

        assert!(matches!(
            driver.writer("/blk", true).await,
            Err(DriverError::Backend(BlobStoreError::NotAppendable {
                blob_type: BlobType::Block,
                ..
            }))
        ));
        assert_eq!(
            driver.get_content("/blk").await.unwrap(),
            Bytes::from_static(b"data")
        );
    }

    #[tokio::test]
    async fn test_walk_visits_sorted_and_skips() {
        let (_store, driver) = memory_driver("").await;
        for path in ["/b/2", "/a/1", "/a/skip/x", "/c", "/b/1", "/b/3"] {
            driver.put_content(path, Bytes::from_static(b"x")).await.unwrap();
        }

        let mut visited = vec![];
        driver
            .walk("/", &mut |info: &FileInfo| -> Result<WalkControl> {
                visited.push(info.path().to_string());
                Ok(match info.path() {
                    "/a/skip" => WalkControl::SkipDir,
                    "/b/1" => WalkControl::SkipDir,
                    _ => WalkControl::Continue,
                })
            })
            .await
            .unwrap();

        assert_eq!(visited, vec!["/a", "/a/1", "/a/skip", "/b", "/b/1", "/c"]);
    }

    #[tokio::test]
    async fn test_walk_stops_on_visitor_error() {
        let (_store, driver) = memory_driver("").await;
        driver.put_content("/a/1", Bytes::from_static(b"x")).await.unwrap();
        driver.put_content("/b/1", Bytes::from_static(b"x")).await.unwrap();

        let mut seen = 0;
        let err = driver
            .walk("/", &mut |_: &FileInfo| -> Result<WalkControl> {
                seen += 1;
                Err(DriverError::not_found("/stop"))
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(seen, 1);
    }
}
