use std::path::PathBuf;

use thiserror::Error;
use vessel_cache::CacheError;
use vessel_manifest::ManifestError;
use vessel_store::StoreError;
use vessel_types::TypeError;

/// Errors reported by a [`MetadataClient`](crate::MetadataClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result alias for metadata service calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors from artifact operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The operation needs server identity but the artifact is still a draft.
    #[error("'{op}' requires a logged artifact; commit it first")]
    NotLogged { op: &'static str },

    /// The artifact no longer accepts changes to its contents.
    #[error("artifact is finalized and can no longer be modified")]
    Finalized,

    #[error("validation failed: {0}")]
    NameValidation(#[from] TypeError),

    #[error("unsupported reference scheme {scheme:?}")]
    UnsupportedReference { scheme: String },

    #[error("invalid reference {uri:?}: {reason}")]
    InvalidReference { uri: String, reason: String },

    /// Local content does not match the manifest.
    #[error("digest mismatch at {path}")]
    DigestMismatch { path: String },

    /// A file under the verified root is not in the manifest.
    #[error("untracked file {path}")]
    UntrackedFile { path: String },

    /// `wait` gave up before the background commit finished.
    #[error("timed out waiting for artifact commit")]
    WaitTimeout,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("not a file: {0}")]
    NotAFile(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("remote error: {0}")]
    Remote(#[from] ApiError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for ArtifactError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnsupportedReference { scheme } => Self::UnsupportedReference { scheme },
            StoreError::InvalidReference { uri, reason } => Self::InvalidReference { uri, reason },
            StoreError::DigestMismatch { path, .. } => Self::DigestMismatch { path },
            StoreError::Manifest(e) => Self::Manifest(e),
            other => Self::Store(other),
        }
    }
}

/// Result alias for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;
