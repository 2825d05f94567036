//! `Source`, the opaque content producer behind an emitted asset, and the
//! `AssetEntry`/`AssetInfo` pair a `Compilation` hands to the emission engine.

use std::fmt;
use std::sync::Arc;

/// Either form a `Source` may hand back its content in.
pub enum SourceContent {
    Buffer(Vec<u8>),
    Text(String),
}

impl SourceContent {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            SourceContent::Buffer(b) => b,
            SourceContent::Text(s) => s.into_bytes(),
        }
    }
}

/// An opaque producer of byte content for an emitted asset.
pub trait Source: fmt::Debug + Send + Sync {
    /// A buffer-yielding accessor, when the source has one natively.
    fn buffer(&self) -> Option<Vec<u8>> {
        None
    }

    /// Always available; buffer or UTF-8 string form.
    fn source(&self) -> SourceContent;

    fn size(&self) -> usize;
}

/// Content extraction (write protocol step 10): prefer a buffer-yielding
/// method when available, otherwise coerce the string form via UTF-8.
pub fn extract_bytes(source: &dyn Source) -> Vec<u8> {
    source.buffer().unwrap_or_else(|| source.source().into_bytes())
}

/// A placeholder source remembering only the byte size, installed in place
/// of a concrete source once it is known-equal to disk, so the concrete
/// bytes can be reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct SizeOnlySource {
    size: usize,
}

impl SizeOnlySource {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Source for SizeOnlySource {
    fn source(&self) -> SourceContent {
        SourceContent::Buffer(Vec::new())
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// A source backed by a plain in-memory buffer or string. Real `Source`
/// implementations (raw/concat sources) are always either buffer-backed or
/// string-backed; this is the buffer-backed case used throughout the test
/// suite and by any caller that already has bytes.
#[derive(Debug, Clone)]
pub struct RawSource {
    bytes: Arc<Vec<u8>>,
}

impl RawSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::new(bytes.into()),
        }
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self::from_bytes(s.into().into_bytes())
    }
}

impl Source for RawSource {
    fn buffer(&self) -> Option<Vec<u8>> {
        Some((*self.bytes).clone())
    }

    fn source(&self) -> SourceContent {
        SourceContent::Buffer((*self.bytes).clone())
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// `info.immutable` indicates the source has no in-place mutation semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    pub immutable: bool,
}

impl AssetInfo {
    pub fn immutable() -> Self {
        Self { immutable: true }
    }
}

#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub name: String,
    pub source: Arc<dyn Source>,
    pub info: AssetInfo,
}
