//! Storage layer for downloaded bytes.
//!
//! Defines the sink that write jobs push content into, with a
//! file-system implementation and an in-memory one for tests and
//! simulations.

mod file_storage;
mod memory;

use async_trait::async_trait;
pub use file_storage::FileSystemStorage;
pub use memory::MemoryStorage;

use crate::swarm::SwarmFile;

/// Destination for downloaded content.
///
/// Offsets are relative to the start of the given file. The coordinator
/// hands each byte to exactly one writer, so implementations never see
/// overlapping concurrent writes.
#[async_trait]
pub trait SwarmStorage: Send + Sync {
    /// Writes `data` at `offset` within `file`.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    /// - `StorageError::InvalidPath` - If the file cannot be mapped to a location
    async fn write_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Reads `length` bytes at `offset` within `file`.
    ///
    /// # Errors
    ///
    /// - `StorageError::ShortRead` - If fewer bytes than requested are stored
    /// - `StorageError::Io` - If file system operation failed
    async fn read_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, StorageError>;

    /// Flushes buffered writes for `file` to durable storage.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If file system operation failed
    async fn flush(&self, file: &SwarmFile) -> Result<(), StorageError>;
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Stored content ended before the requested read did
    #[error("Short read from {path} at {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// File being read
        path: String,
        /// Relative offset of the read
        offset: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// File path cannot be mapped onto the storage backend
    #[error("Invalid storage path: {path}")]
    InvalidPath {
        /// Offending path
        path: String,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
