use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use vessel_cache::{CacheKey, ContentCache};
use vessel_manifest::{LogicalPath, ManifestEntry, DEFAULT_STORAGE_POLICY};

use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::handler::StorageHandler;
use crate::staging::{StagedFile, StagingArea};
use crate::uri::scheme_of;

/// A file staged for a draft together with the entry describing it.
///
/// Call [`StagedEntry::keep`] to retain the copy and get the final entry;
/// dropping it discards the copy.
#[derive(Debug)]
pub struct StagedEntry {
    path: LogicalPath,
    staged: StagedFile,
}

impl StagedEntry {
    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    pub fn digest(&self) -> &str {
        self.staged.digest()
    }

    pub fn size(&self) -> u64 {
        self.staged.size()
    }

    /// Keep the staged copy and return the entry pointing at it.
    pub fn keep(self) -> StoreResult<ManifestEntry> {
        let digest = self.staged.digest().to_string();
        let size = self.staged.size();
        let local = self.staged.keep()?;
        Ok(ManifestEntry::new(self.path, digest, size).with_local_path(local))
    }
}

/// Decides where artifact content lives and how it is brought back.
///
/// Plain files are staged locally, uploaded to the [`ContentStore`] on
/// commit, and loaded back through the content cache. References are
/// dispatched by URI scheme to the first registered [`StorageHandler`] that
/// accepts it.
pub struct StoragePolicy {
    name: String,
    handlers: Vec<Box<dyn StorageHandler>>,
    staging: StagingArea,
    store: Arc<dyn ContentStore>,
    cache: Arc<ContentCache>,
}

impl StoragePolicy {
    /// A policy with no reference handlers registered.
    pub fn new(staging: StagingArea, store: Arc<dyn ContentStore>, cache: Arc<ContentCache>) -> Self {
        Self {
            name: DEFAULT_STORAGE_POLICY.to_string(),
            handlers: Vec::new(),
            staging,
            store,
            cache,
        }
    }

    /// Register a handler after all existing ones.
    pub fn with_handler(mut self, handler: impl StorageHandler + 'static) -> Self {
        self.register(Box::new(handler));
        self
    }

    pub fn register(&mut self, handler: Box<dyn StorageHandler>) {
        debug!(handler = handler.name(), "storage handler registered");
        self.handlers.push(handler);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// The first handler accepting `scheme`.
    pub fn handler_for(&self, scheme: &str) -> StoreResult<&dyn StorageHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(scheme))
            .map(|h| h.as_ref())
            .ok_or_else(|| StoreError::UnsupportedReference {
                scheme: scheme.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Stage a copy of `local_path` to be stored at `name`.
    pub fn store_file(&self, local_path: &Path, name: LogicalPath) -> StoreResult<StagedEntry> {
        let staged = self.staging.stage_copy(local_path)?;
        Ok(StagedEntry { path: name, staged })
    }

    /// Stage a file whose content is produced by `write`.
    pub fn store_with<F>(&self, name: LogicalPath, write: F) -> StoreResult<StagedEntry>
    where
        F: FnOnce(&mut File) -> StoreResult<()>,
    {
        let staged = self.staging.stage_with(write)?;
        Ok(StagedEntry { path: name, staged })
    }

    /// Turn a reference URI into entries via the matching handler.
    pub fn store_reference(
        &self,
        uri: &str,
        name: Option<&LogicalPath>,
        checksum: bool,
        max_objects: Option<usize>,
    ) -> StoreResult<Vec<ManifestEntry>> {
        let scheme = scheme_of(uri)?;
        let handler = self.handler_for(scheme)?;
        let entries = handler.store_reference(uri, name, checksum, max_objects)?;
        debug!(uri, handler = handler.name(), count = entries.len(), "reference stored");
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// A local file holding the content of `entry`.
    ///
    /// The returned path belongs to the staging area, the content cache or a
    /// referenced filesystem and must not be modified.
    pub fn load_path(&self, entry: &ManifestEntry) -> StoreResult<PathBuf> {
        if let Some(uri) = entry.reference.as_deref() {
            let scheme = scheme_of(uri)?;
            return self.handler_for(scheme)?.load_path(entry);
        }

        if let Some(local) = entry.local_path.as_deref() {
            if local.is_file() {
                return Ok(local.to_path_buf());
            }
        }

        let key = CacheKey::for_digest(&entry.digest)?;
        self.cache.fetch(&key, entry.size, |dest: &mut File| {
            self.store.download(&entry.digest, dest)?;
            Ok::<(), StoreError>(())
        })
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Push a staged entry's content to the content store.
    ///
    /// Returns `Ok(false)` for references and for content the store already
    /// holds.
    pub fn upload_staged(&self, entry: &ManifestEntry) -> StoreResult<bool> {
        if entry.is_reference() {
            return Ok(false);
        }
        let local = entry
            .local_path
            .as_deref()
            .ok_or_else(|| StoreError::NotFound(format!("staged copy of {}", entry.path)))?;
        let uploaded = self.store.upload(&entry.digest, local)?;
        debug!(path = %entry.path, uploaded, "staged entry pushed");
        Ok(uploaded)
    }

    /// Move a staged copy into the content cache after a commit.
    ///
    /// Returns the cached path. The staging copy is removed.
    pub fn adopt_staged(&self, entry: &ManifestEntry) -> StoreResult<Option<PathBuf>> {
        let Some(local) = entry.local_path.as_deref() else {
            return Ok(None);
        };
        let key = CacheKey::for_digest(&entry.digest)?;
        let cached = self.cache.insert_file(&key, local)?;
        self.staging.release(local);
        Ok(Some(cached))
    }
}

impl std::fmt::Debug for StoragePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("StoragePolicy")
            .field("name", &self.name)
            .field("handlers", &handlers)
            .field("staging", &self.staging.dir())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{LocalFileHandler, RemoteObjectHandler, DEFAULT_BUCKET_MAX_OBJECTS};
    use crate::memory::{InMemoryContentStore, InMemoryObjectSource};
    use crate::source::ObjectSource;
    use crate::uri::path_to_file_uri;
    use std::fs;
    use std::io::Write;
    use vessel_crypto::md5_bytes_b64;

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<InMemoryContentStore>,
        policy: StoragePolicy,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryContentStore::new());
        let cache = Arc::new(ContentCache::new(dir.path().join("cache")));
        let source: Arc<dyn ObjectSource> = Arc::new(InMemoryObjectSource::new());
        let policy = StoragePolicy::new(
            StagingArea::new(dir.path().join("staging")),
            Arc::clone(&store) as Arc<dyn ContentStore>,
            Arc::clone(&cache),
        )
        .with_handler(LocalFileHandler::new())
        .with_handler(RemoteObjectHandler::bucket(
            ["s3", "gs"],
            source,
            cache,
            DEFAULT_BUCKET_MAX_OBJECTS,
        ));
        Fixture { dir, store, policy }
    }

    fn lp(p: &str) -> LogicalPath {
        LogicalPath::new(p).unwrap()
    }

    #[test]
    fn unknown_scheme_is_unsupported() {
        let f = fixture();
        assert!(matches!(
            f.policy.store_reference("ftp://host/x", None, true, None),
            Err(StoreError::UnsupportedReference { scheme }) if scheme == "ftp"
        ));
        assert!(matches!(
            f.policy.store_reference("no-scheme", None, true, None),
            Err(StoreError::InvalidReference { .. })
        ));
    }

    #[test]
    fn dispatches_to_registered_handler() {
        let f = fixture();
        assert_eq!(f.policy.handler_for("file").unwrap().name(), "local-file");
        assert_eq!(f.policy.handler_for("gs").unwrap().name(), "bucket");

        let file = f.dir.path().join("ref.txt");
        fs::write(&file, b"r").unwrap();
        let entries = f
            .policy
            .store_reference(&path_to_file_uri(&file), None, true, None)
            .unwrap();
        assert_eq!(entries[0].path.as_str(), "ref.txt");
        assert_eq!(f.policy.load_path(&entries[0]).unwrap(), file);
    }

    #[test]
    fn store_upload_adopt_load() {
        let f = fixture();
        let src = f.dir.path().join("a.txt");
        fs::write(&src, b"alpha").unwrap();

        let staged = f.policy.store_file(&src, lp("docs/a.txt")).unwrap();
        assert_eq!(staged.digest(), md5_bytes_b64(b"alpha"));
        let entry = staged.keep().unwrap();
        let local = entry.local_path.clone().unwrap();
        assert_eq!(f.policy.load_path(&entry).unwrap(), local);

        assert!(f.policy.upload_staged(&entry).unwrap());
        assert!(!f.policy.upload_staged(&entry).unwrap());

        let cached = f.policy.adopt_staged(&entry).unwrap().unwrap();
        assert!(!local.exists());
        assert_eq!(fs::read(&cached).unwrap(), b"alpha");

        // Without a staged copy the content comes from the cache, not the store.
        let mut committed = entry.clone();
        committed.local_path = None;
        assert_eq!(f.policy.load_path(&committed).unwrap(), cached);
        assert_eq!(f.store.download_count(), 0);
    }

    #[test]
    fn load_downloads_once_on_cache_miss() {
        let f = fixture();
        let src = f.dir.path().join("b.txt");
        fs::write(&src, b"beta").unwrap();
        let entry = f.policy.store_file(&src, lp("b.txt")).unwrap().keep().unwrap();
        f.policy.upload_staged(&entry).unwrap();

        let mut remote_only = entry.clone();
        remote_only.local_path = None;
        let first = f.policy.load_path(&remote_only).unwrap();
        let second = f.policy.load_path(&remote_only).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(first).unwrap(), b"beta");
        assert_eq!(f.store.download_count(), 1);
    }

    #[test]
    fn store_with_writer() {
        let f = fixture();
        let entry = f
            .policy
            .store_with(lp("gen/out.txt"), |file| {
                file.write_all(b"generated").map_err(|e| StoreError::io("w", e))
            })
            .unwrap()
            .keep()
            .unwrap();
        assert_eq!(entry.digest, md5_bytes_b64(b"generated"));
        assert_eq!(entry.size, Some(9));
    }
}
