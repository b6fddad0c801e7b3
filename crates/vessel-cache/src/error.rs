use std::path::PathBuf;

use vessel_crypto::DigestError;

/// Errors from the content cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A digest could not be turned into a cache key.
    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    /// Another caller's fetch for the same key failed.
    #[error("fetch of {key} failed: {reason}")]
    FetchFailed { key: String, reason: String },

    /// The fetched content did not have the expected length.
    #[error("size mismatch for {key}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// I/O error touching a cache file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
