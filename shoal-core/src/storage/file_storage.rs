//! File-system backed storage.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{StorageError, SwarmStorage};
use crate::config::StorageConfig;
use crate::swarm::SwarmFile;

/// Writes each [`SwarmFile`] to `root/<path>`.
///
/// Open handles are cached per path and reused across write jobs.
pub struct FileSystemStorage {
    root: PathBuf,
    create_dirs: bool,
    handles: Mutex<HashMap<String, File>>,
}

impl FileSystemStorage {
    /// Creates storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            root: root.into(),
            create_dirs: config.create_dirs,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory all files are written under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `file` on disk.
    pub fn path_for(&self, file: &SwarmFile) -> PathBuf {
        file.path()
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    async fn open(&self, file: &SwarmFile) -> Result<File, StorageError> {
        let path = self.path_for(file);
        if self.create_dirs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
        }

        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        tracing::debug!("Opened {} for swarm writes", path.display());
        Ok(handle)
    }
}

#[async_trait]
impl SwarmStorage for FileSystemStorage {
    async fn write_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut handles = self.handles.lock().await;
        if !handles.contains_key(file.path()) {
            let handle = self.open(file).await?;
            handles.insert(file.path().to_string(), handle);
        }
        let handle = handles
            .get_mut(file.path())
            .ok_or_else(|| StorageError::InvalidPath {
                path: file.path().to_string(),
            })?;

        handle.seek(SeekFrom::Start(offset)).await?;
        handle.write_all(data).await?;
        Ok(())
    }

    async fn read_at(
        &self,
        file: &SwarmFile,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let mut handles = self.handles.lock().await;
        if !handles.contains_key(file.path()) {
            let handle = self.open(file).await?;
            handles.insert(file.path().to_string(), handle);
        }
        let handle = handles
            .get_mut(file.path())
            .ok_or_else(|| StorageError::InvalidPath {
                path: file.path().to_string(),
            })?;

        handle.flush().await?;
        handle.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let read = handle.read(&mut buffer[filled..]).await?;
            if read == 0 {
                return Err(StorageError::ShortRead {
                    path: file.path().to_string(),
                    offset,
                    expected: length,
                    actual: filled,
                });
            }
            filled += read;
        }
        Ok(buffer)
    }

    async fn flush(&self, file: &SwarmFile) -> Result<(), StorageError> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get_mut(file.path()) {
            handle.flush().await?;
            handle.sync_data().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::swarm::SwarmFileSystem;

    #[tokio::test]
    async fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path(), &StorageConfig::default());
        let layout = SwarmFileSystem::new([("nested/data.bin", 64)]).unwrap();
        let file = &layout.files()[0];

        storage.write_at(file, 32, b"tail").await.unwrap();
        storage.write_at(file, 0, b"head").await.unwrap();
        storage.flush(file).await.unwrap();

        assert_eq!(storage.read_at(file, 0, 4).await.unwrap(), b"head");
        assert_eq!(storage.read_at(file, 32, 4).await.unwrap(), b"tail");

        let on_disk = std::fs::read(dir.path().join("nested").join("data.bin")).unwrap();
        assert_eq!(on_disk.len(), 36);
    }

    #[tokio::test]
    async fn test_read_past_end_is_short_read() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path(), &StorageConfig::default());
        let layout = SwarmFileSystem::single("data.bin", 64).unwrap();
        let file = &layout.files()[0];

        storage.write_at(file, 0, b"abc").await.unwrap();
        let result = storage.read_at(file, 0, 10).await;
        assert!(matches!(
            result,
            Err(StorageError::ShortRead { actual: 3, .. })
        ));
    }
}
