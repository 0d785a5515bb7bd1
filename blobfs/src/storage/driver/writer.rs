//! ChunkedWriter: buffers writes and appends them to a blob chunk by chunk.
//!
//! The backend has no "write then finalize" primitive for plain blobs, so the
//! writer appends to an append blob as data arrives and tracks commit and
//! cancel itself, through an explicit state table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::path_error;
use crate::error::{BlobStoreError, DriverError, Result};
use crate::storage::FileWriter;
use crate::storage::backend::BlobStore;

/// How a writer session ended, recorded once it is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Closed straight from `Open`. The bytes are in the blob, but the
    /// caller never said whether they should be kept.
    Uncommitted,
    Committed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Committed,
    Cancelled,
    Closed(Resolution),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterOp {
    Write,
    Commit,
    Cancel,
    Close,
}

impl WriterOp {
    fn name(self) -> &'static str {
        match self {
            WriterOp::Write => "write",
            WriterOp::Commit => "commit",
            WriterOp::Cancel => "cancel",
            WriterOp::Close => "close",
        }
    }
}

impl WriterState {
    /// The state after `op`, or `InvalidState` if `op` is not allowed here.
    pub fn transition(self, op: WriterOp) -> Result<WriterState> {
        use WriterOp as Op;
        use WriterState as S;

        match (self, op) {
            (S::Open, Op::Write) => Ok(S::Open),
            (S::Open, Op::Commit) => Ok(S::Committed),
            (S::Open, Op::Cancel) => Ok(S::Cancelled),
            (S::Open, Op::Close) => Ok(S::Closed(Resolution::Uncommitted)),
            (S::Committed, Op::Close) => Ok(S::Closed(Resolution::Committed)),
            (S::Cancelled, Op::Close) => Ok(S::Closed(Resolution::Cancelled)),
            (state, op) => Err(DriverError::InvalidState {
                op: op.name(),
                state: state.label(),
            }),
        }
    }

    fn label(self) -> &'static str {
        match self {
            WriterState::Open => "open",
            WriterState::Committed => "committed",
            WriterState::Cancelled => "cancelled",
            WriterState::Closed(_) => "closed",
        }
    }
}

/// Bytes that made it to the backend before an append failed.
#[derive(Debug)]
pub(crate) struct AppendError {
    pub appended: usize,
    pub source: BlobStoreError,
}

/// Sends blocks to an append blob, at most `max_chunk_size` bytes per call.
pub(crate) struct ChunkAppender {
    store: Arc<dyn BlobStore>,
    key: String,
    max_chunk_size: usize,
}

impl ChunkAppender {
    pub(crate) fn new(store: Arc<dyn BlobStore>, key: String, max_chunk_size: usize) -> Self {
        ChunkAppender {
            store,
            key,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Appends `data` in order, stopping at the first failed chunk.
    pub(crate) async fn append_all(&self, data: &[u8]) -> Result<(), AppendError> {
        let mut appended = 0;
        for chunk in data.chunks(self.max_chunk_size) {
            if let Err(source) = self.store.append_chunk(&self.key, chunk).await {
                return Err(AppendError { appended, source });
            }
            appended += chunk.len();
        }
        Ok(())
    }
}

pub struct ChunkedWriter {
    appender: ChunkAppender,
    path: String,
    size: u64,
    buffer: Vec<u8>,
    chunk_size: usize,
    state: WriterState,
}

impl ChunkedWriter {
    /// Wraps an existing append blob at `key`. `size` is what it already holds.
    pub(crate) fn new(
        store: Arc<dyn BlobStore>,
        path: &str,
        key: String,
        size: u64,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        ChunkedWriter {
            appender: ChunkAppender::new(store, key, chunk_size),
            path: path.to_string(),
            size,
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
            state: WriterState::Open,
        }
    }

    /// Bytes held locally, not yet appended.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends whatever is buffered. Bytes that did reach the backend leave
    /// the buffer even when a later chunk fails.
    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match self.appender.append_all(&self.buffer).await {
            Ok(()) => {
                self.buffer.clear();
                Ok(())
            }
            Err(AppendError { appended, source }) => {
                self.buffer.drain(..appended);
                Err(path_error(&self.path, source))
            }
        }
    }
}

#[async_trait]
impl FileWriter for ChunkedWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.transition(WriterOp::Write)?;

        let mut rest = buf;
        let mut accepted = 0;
        while self.buffer.len() + rest.len() >= self.chunk_size {
            if self.buffer.is_empty() {
                // Nothing pending: whole chunks go straight to the backend.
                let whole = rest.len() - rest.len() % self.chunk_size;
                if let Err(err) = self.appender.append_all(&rest[..whole]).await {
                    accepted += err.appended;
                    self.size += accepted as u64;
                    return Err(DriverError::PartialWrite {
                        accepted: accepted as u64,
                        source: err.source,
                    });
                }
                accepted += whole;
                rest = &rest[whole..];
            } else {
                let take = self.chunk_size - self.buffer.len();
                self.buffer.extend_from_slice(&rest[..take]);
                if let Err(err) = self.appender.append_all(&self.buffer).await {
                    self.buffer.truncate(self.buffer.len() - take);
                    self.size += accepted as u64;
                    return Err(DriverError::PartialWrite {
                        accepted: accepted as u64,
                        source: err.source,
                    });
                }
                self.buffer.clear();
                accepted += take;
                rest = &rest[take..];
            }
        }

        self.buffer.extend_from_slice(rest);
        accepted += rest.len();
        self.size += accepted as u64;
        Ok(accepted)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn state(&self) -> WriterState {
        self.state
    }

    async fn close(&mut self) -> Result<()> {
        self.state = self.state.transition(WriterOp::Close)?;
        debug!(path = %self.path, state = ?self.state, size = self.size, "closing writer");
        self.flush().await
    }

    async fn cancel(&mut self) -> Result<()> {
        self.state = self.state.transition(WriterOp::Cancel)?;
        self.buffer.clear();
        info!(path = %self.path, "cancelling upload");
        self.appender
            .store
            .delete(&self.appender.key)
            .await
            .map_err(|err| path_error(&self.path, err))
    }

    async fn commit(&mut self) -> Result<()> {
        let next = self.state.transition(WriterOp::Commit)?;
        self.flush().await?;
        self.state = next;
        info!(path = %self.path, size = self.size, "committed upload");
        Ok(())
    }
}
