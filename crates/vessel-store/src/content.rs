use std::io::Write;
use std::path::Path;

use crate::error::StoreResult;

/// Engine-managed storage for uploaded file content and manifest documents.
///
/// File content is addressed by its base64 MD5 digest. Manifest documents
/// are addressed by the URL returned from [`ContentStore::put_manifest`].
pub trait ContentStore: Send + Sync {
    /// Upload the file at `src` under `digest`.
    ///
    /// Returns `Ok(false)` without transferring anything if the content is
    /// already present.
    fn upload(&self, digest: &str, src: &Path) -> StoreResult<bool>;

    /// Returns `true` if content with this digest has been uploaded.
    fn contains(&self, digest: &str) -> StoreResult<bool>;

    /// Stream the content for `digest` into `dest`. Returns the byte count.
    fn download(&self, digest: &str, dest: &mut dyn Write) -> StoreResult<u64>;

    /// Store a serialized manifest and return the URL it can be fetched from.
    fn put_manifest(&self, digest: &str, document: &[u8]) -> StoreResult<String>;

    /// Fetch a manifest document previously stored with `put_manifest`.
    fn get_manifest(&self, url: &str) -> StoreResult<Vec<u8>>;
}
