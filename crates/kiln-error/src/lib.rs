//! Error taxonomy shared by every `kiln-*` crate.
//!
//! The driver never invents a new error shape per call site; every failure
//! surfaced out of `kiln-core` is one of the variants below.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `run` or `watch` call landed while the compiler already had one in flight.
    #[error("cannot start a build while another is already running")]
    ConcurrentBuild,

    /// The records sidecar exists but is not valid JSON.
    #[error("failed to parse records at {path}: {source}")]
    RecordsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Two assets in the same emission would land on the same path on a
    /// case-insensitive filesystem.
    #[error("asset emission case collision: {first} and {second} both resolve to the same path")]
    CaseCollision { first: PathBuf, second: PathBuf },

    /// Any filesystem operation that propagated an OS-level error.
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tap surfaced a failure through an async hook.
    #[error("tap {tap} on hook {hook} failed: {message}")]
    HookTapFailure {
        hook: &'static str,
        tap: String,
        message: String,
    },

    /// Misuse at an API boundary, e.g. an empty logger name.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The cache failed to shut down cleanly on `close`.
    #[error("cache shutdown failed: {0}")]
    Shutdown(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
