use std::io;

use thiserror::Error;

use crate::storage::backend::BlobType;

/// Errors raised by a [`BlobStore`](crate::storage::backend::BlobStore) implementation.
#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("blob not found: {key}")]
    NotFound { key: String },

    #[error("blob {key} is a {blob_type} blob and cannot be appended to")]
    NotAppendable { key: String, blob_type: BlobType },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl BlobStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("uploading {size} bytes with put_content is not supported; limit: {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },

    // The delete half of a legacy replacement failed; the old blob is still in place.
    #[error("failed to delete legacy {blob_type} blob at {path}: {source}")]
    LegacyTypeConflict {
        path: String,
        blob_type: BlobType,
        #[source]
        source: BlobStoreError,
    },

    #[error("cannot {op}: already {state}")]
    InvalidState { op: &'static str, state: &'static str },

    #[error("write failed after accepting {accepted} bytes: {source}")]
    PartialWrite {
        accepted: u64,
        #[source]
        source: BlobStoreError,
    },

    #[error("listing of {prefix:?} returned marker {marker:?} twice after {} entries", listed.len())]
    PaginationStalled {
        prefix: String,
        marker: String,
        listed: Vec<String>,
    },

    #[error("invalid driver configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(#[from] BlobStoreError),
}

impl DriverError {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. })
    }
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
