use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::Result;

pub mod backend;
pub mod driver;
pub mod paths;
pub mod walk;

pub use driver::writer::{Resolution, WriterState};

/// Stream over a blob's content, starting at the requested offset.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Visitor invoked by [`StorageDriver::walk`] for every entry below the start path.
pub type WalkFn<'a> = dyn FnMut(&FileInfo) -> Result<WalkControl> + Send + 'a;

/// What a Stat call found at a virtual path.
///
/// Directories are never stored; they exist while at least one blob
/// lives below them and carry no metadata of their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileInfo {
    File {
        path: String,
        size: u64,
        modified: DateTime<Utc>,
    },
    Directory {
        path: String,
    },
}

impl FileInfo {
    pub fn path(&self) -> &str {
        match self {
            FileInfo::File { path, .. } | FileInfo::Directory { path } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileInfo::Directory { .. })
    }

    pub fn size(&self) -> u64 {
        match self {
            FileInfo::File { size, .. } => *size,
            FileInfo::Directory { .. } => 0,
        }
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        match self {
            FileInfo::File { modified, .. } => Some(*modified),
            FileInfo::Directory { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// On a directory, skip its subtree. On a file, skip its remaining siblings.
    SkipDir,
}

/// A writer that appends to a blob until it is committed or cancelled.
///
/// `close` must be called exactly once, after `commit` or `cancel` or in
/// place of them.
#[async_trait::async_trait]
pub trait FileWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Bytes accepted so far, including the size the blob had when the writer
    /// was opened in append mode.
    fn size(&self) -> u64;

    fn state(&self) -> WriterState;

    async fn close(&mut self) -> Result<()>;

    async fn cancel(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn get_content(&self, path: &str) -> Result<Bytes>;

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()>;

    async fn reader(&self, path: &str, offset: u64) -> Result<BlobReader>;

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>>;

    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Direct descendants of `path`, blobs and virtual directories alike.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    async fn move_path(&self, source_path: &str, dest_path: &str) -> Result<()>;

    /// Deletes the blob at `path`, or every blob below it.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn walk(&self, path: &str, visitor: &mut WalkFn<'_>) -> Result<()>;
}
