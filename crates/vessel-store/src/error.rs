use std::path::PathBuf;

use vessel_cache::CacheError;
use vessel_crypto::DigestError;
use vessel_manifest::ManifestError;

/// Errors from storage policy, handlers, and content stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No registered handler accepts this URI scheme.
    #[error("unsupported reference scheme {scheme:?}")]
    UnsupportedReference { scheme: String },

    /// The reference URI is malformed.
    #[error("invalid reference {uri:?}: {reason}")]
    InvalidReference { uri: String, reason: String },

    /// The referenced object, file or artifact entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Content at a path no longer matches its recorded digest.
    #[error("digest mismatch for {path}: expected {expected}, found {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A remote endpoint answered with a non-success status.
    #[error("remote returned status {status} for {uri}")]
    Remote { uri: String, status: u16 },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resolving an entry of another artifact failed.
    #[error("artifact resolution failed: {0}")]
    Artifact(String),

    /// The session that resolves cross-artifact references is gone.
    #[error("artifact resolver is no longer available")]
    ResolverUnavailable,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    /// I/O error touching a local path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
