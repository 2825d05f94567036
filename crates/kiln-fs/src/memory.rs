use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_error::{Error, Result};

use crate::{Metadata, ReadableFileSystem, WritableFileSystem};

/// Process-local filesystem double. Used by the test suite, and suitable for
/// embedding a driver instance in a tool that never wants to touch disk.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: DashMap<PathBuf, Vec<u8>>,
    dirs: DashMap<PathBuf, ()>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let dirs = DashMap::new();
        dirs.insert(PathBuf::from("/"), ());
        Self {
            files: DashMap::new(),
            dirs,
        }
    }
}

#[async_trait]
impl ReadableFileSystem for MemoryFileSystem {
    async fn stat(&self, path: &Path) -> Result<Metadata> {
        if let Some(content) = self.files.get(path) {
            return Ok(Metadata {
                is_file: true,
                is_dir: false,
                len: content.len() as u64,
            });
        }
        if self.dirs.contains_key(path) {
            return Ok(Metadata {
                is_file: false,
                is_dir: true,
                len: 0,
            });
        }
        Err(Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        ))
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.get(path).map(|c| c.clone()).ok_or_else(|| {
            Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        })
    }
}

#[async_trait]
impl WritableFileSystem for MemoryFileSystem {
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.files.insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        if self.files.contains_key(path) {
            return Err(Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "path is a file"),
            ));
        }
        self.dirs.insert(path.to_path_buf(), ());
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        self.files.remove(path);
        Ok(())
    }
}
