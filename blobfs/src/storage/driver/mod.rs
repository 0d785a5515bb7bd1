//! The virtual filesystem driver and the pieces it is assembled from.

use crate::error::{BlobStoreError, DriverError};

pub mod blob;
pub mod listing;
pub mod writer;

pub use blob::BlobDriver;

/// Upper bound for a single append call, matching Azure's append block limit.
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Reports a missing key under the virtual path the caller asked for.
pub(crate) fn path_error(path: &str, err: BlobStoreError) -> DriverError {
    if err.is_not_found() {
        DriverError::not_found(path)
    } else {
        DriverError::Backend(err)
    }
}
