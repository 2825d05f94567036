//! Filesystem abstraction consumed by the compiler driver.
//!
//! The driver never talks to `std::fs`/`tokio::fs` directly; it goes through
//! [`ReadableFileSystem`]/[`WritableFileSystem`] so the same driver code runs
//! against a real disk or an in-memory double in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_error::{Error, Result};

/// Metadata returned by `stat`. Deliberately thin — the driver only ever
/// asks "does this exist, is it a file, how big is it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub is_file: bool,
    pub is_dir: bool,
    pub len: u64,
}

#[async_trait]
pub trait ReadableFileSystem: std::fmt::Debug + Send + Sync {
    async fn stat(&self, path: &Path) -> Result<Metadata>;
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Best-effort cache purge. Most adaptors have nothing to purge.
    fn purge(&self) {}
}

#[async_trait]
pub trait WritableFileSystem: ReadableFileSystem {
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn mkdir(&self, path: &Path) -> Result<()>;
    async fn remove_file(&self, path: &Path) -> Result<()>;
}

/// Joins `base` with a relative path the way the driver's `targetFile`
/// computation does: no normalisation beyond what `Path::join` already does.
pub fn join(base: &Path, part: &str) -> PathBuf {
    base.join(part)
}

/// Recursive mkdir: create each missing ancestor in order, tolerating
/// "already exists" for directories and failing on "exists but not a
/// directory".
pub async fn mkdirp<FS: WritableFileSystem + ?Sized>(fs: &FS, path: &Path) -> Result<()> {
    let mut to_create = Vec::new();
    let mut cursor = Some(path);
    while let Some(p) = cursor {
        match fs.stat(p).await {
            Ok(meta) if meta.is_dir => break,
            Ok(_) => {
                return Err(Error::io(
                    p,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "path exists and is not a directory",
                    ),
                ));
            }
            Err(_) => to_create.push(p),
        }
        cursor = p.parent().filter(|parent| !parent.as_os_str().is_empty());
    }
    for dir in to_create.into_iter().rev() {
        fs.mkdir(dir).await?;
    }
    Ok(())
}

mod memory;
mod native;

pub use memory::MemoryFileSystem;
pub use native::NativeFileSystem;
