/// Errors from manifest operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    /// A logical path could not be normalized.
    #[error("invalid logical path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// An entry already exists at this path with different content.
    #[error("cannot add {path}: already present with digest {existing}, got {incoming}")]
    DigestConflict {
        path: String,
        existing: String,
        incoming: String,
    },

    /// The manifest document uses a format version this build cannot read.
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u32),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
