use std::path::Path;

use async_trait::async_trait;
use kiln_error::{Error, Result};

use crate::{Metadata, ReadableFileSystem, WritableFileSystem};

/// Disk-backed filesystem adaptor, built on the async runtime's own
/// filesystem primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFileSystem;

#[async_trait]
impl ReadableFileSystem for NativeFileSystem {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(Metadata {
            is_file: meta.is_file(),
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| Error::io(path, e))
    }
}

#[async_trait]
impl WritableFileSystem for NativeFileSystem {
    #[tracing::instrument(level = "debug", skip(self, content), fields(bytes = content.len()))]
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        tokio::fs::write(path, content)
            .await
            .map_err(|e| Error::io(path, e))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn mkdir(&self, path: &Path) -> Result<()> {
        match tokio::fs::create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}
