//! A hierarchical virtual filesystem over flat, key-addressed blob stores,
//! with a resumable chunked writer for uploads.

pub mod config;
pub mod error;
pub mod storage;

pub use config::DriverConfig;
pub use error::{BlobStoreError, DriverError};
pub use storage::driver::BlobDriver;
pub use storage::{FileInfo, FileWriter, StorageDriver, WalkControl};
