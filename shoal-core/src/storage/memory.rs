//! In-memory storage for tests and simulations.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StorageError, SwarmStorage};
use crate::swarm::SwarmFile;

/// Keeps every file as a growable byte buffer.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of the file at `path`.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    /// Total bytes held across all files.
    pub fn stored_bytes(&self) -> usize {
        self.files.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SwarmStorage for MemoryStorage {
    async fn write_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let start = usize::try_from(offset).map_err(|_| StorageError::InvalidPath {
            path: file.path().to_string(),
        })?;
        let end = start + data.len();

        let mut files = self.files.lock();
        let buffer = files.entry(file.path().to_string()).or_default();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn read_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let files = self.files.lock();
        let buffer = files.get(file.path()).map(Vec::as_slice).unwrap_or(&[]);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(buffer.len());
        let available = buffer.len() - start;

        if available < length {
            return Err(StorageError::ShortRead {
                path: file.path().to_string(),
                offset,
                expected: length,
                actual: available,
            });
        }
        Ok(buffer[start..start + length].to_vec())
    }

    async fn flush(&self, _file: &SwarmFile) -> Result<(), StorageError> {
        Ok(())
    }
}
