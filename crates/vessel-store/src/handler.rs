use std::path::PathBuf;

use vessel_manifest::{LogicalPath, ManifestEntry};
use vessel_types::ArtifactId;

use crate::error::StoreResult;

/// Strategy for one family of reference URI schemes.
///
/// A [`StoragePolicy`](crate::StoragePolicy) holds handlers in priority
/// order and dispatches each reference to the first one whose
/// [`can_handle`](StorageHandler::can_handle) accepts its scheme.
pub trait StorageHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns `true` if this handler owns URIs with `scheme`.
    fn can_handle(&self, scheme: &str) -> bool;

    /// Turn a reference URI into manifest entries.
    ///
    /// `name` is the logical path the reference is placed at; handlers that
    /// expand prefixes place each object under it. `max_objects` bounds
    /// prefix expansion; `None` means the handler's own default.
    fn store_reference(
        &self,
        uri: &str,
        name: Option<&LogicalPath>,
        checksum: bool,
        max_objects: Option<usize>,
    ) -> StoreResult<Vec<ManifestEntry>>;

    /// Make the content of a reference entry available as a local file.
    fn load_path(&self, entry: &ManifestEntry) -> StoreResult<PathBuf>;
}

/// Resolves entries inside other artifacts for cross-artifact references.
///
/// Implemented by the session that owns the artifact registry.
pub trait ArtifactResolver: Send + Sync {
    /// The manifest entry at `path` in artifact `id`.
    fn resolve_entry(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<ManifestEntry>;

    /// A local file holding the content at `path` in artifact `id`.
    fn materialize(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<PathBuf>;
}
