use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("identifier is not valid UTF-8")]
    InvalidUtf8,

    /// A name, alias, or type failed validation.
    #[error("invalid {kind} {name:?}: {reason}")]
    NameValidation {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid collection path {path:?}: {reason}")]
    InvalidCollectionPath { path: String, reason: String },
}
