//! Persistence backends for the state table

use super::{StoreError, StoreResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Whole-document storage for the serialized state table
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Read the stored document, `None` if nothing has been written yet
    async fn read(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the stored document. Readers must observe either the previous
    /// document or the new one, never a partial write.
    async fn write(&self, document: &[u8]) -> StoreResult<()>;
}

#[async_trait]
impl<T: Persistence + ?Sized> Persistence for Arc<T> {
    async fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        (**self).read().await
    }

    async fn write(&self, document: &[u8]) -> StoreResult<()> {
        (**self).write(document).await
    }
}

/// JSON file on disk, replaced via write-to-temp-then-rename
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Persistence for JsonFileBackend {
    async fn read(&self) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(&self.path, e)),
        }
    }

    async fn write(&self, document: &[u8]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(parent, e))?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Self::io_error(&tmp, e))?;
        file.write_all(document)
            .await
            .map_err(|e| Self::io_error(&tmp, e))?;
        file.sync_all().await.map_err(|e| Self::io_error(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Self::io_error(&self.path, e))
    }
}
