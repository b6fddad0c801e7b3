use std::io::Write;

use crate::error::StoreResult;

/// Metadata of one remote object, read without downloading its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub uri: String,
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

impl ObjectMeta {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            size: None,
            etag: None,
            version_id: None,
        }
    }
}

/// Read access to objects behind remote reference URIs.
///
/// HTTP servers and bucket stores both implement this. Bucket stores
/// additionally support prefix listing.
pub trait ObjectSource: Send + Sync {
    /// Metadata of the object at exactly `uri`.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if no
    /// such object exists.
    fn head(&self, uri: &str) -> StoreResult<ObjectMeta>;

    /// Objects under the prefix `uri`, at most `max` of them, in key order.
    fn list(&self, uri: &str, max: usize) -> StoreResult<Vec<ObjectMeta>>;

    /// Stream the object's bytes into `dest`, pinned to `version_id` when
    /// given. Returns the number of bytes written.
    fn fetch(&self, uri: &str, version_id: Option<&str>, dest: &mut dyn Write) -> StoreResult<u64>;
}
