use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use vessel_crypto::md5_bytes_b64;

use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::source::{ObjectMeta, ObjectSource};

const MANIFEST_URL_PREFIX: &str = "memory://manifests/";

/// In-memory content store for tests and embedding.
///
/// Counts uploads and downloads so callers can assert how often content
/// actually crossed the store boundary.
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    manifests: RwLock<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of uploads that actually transferred content.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of content downloads served.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Raw bytes stored under `digest`.
    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .cloned()
    }
}

impl ContentStore for InMemoryContentStore {
    fn upload(&self, digest: &str, src: &Path) -> StoreResult<bool> {
        if self.contains(digest)? {
            return Ok(false);
        }
        let data = fs::read(src).map_err(|e| StoreError::io(src, e))?;
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        if blobs.contains_key(digest) {
            return Ok(false);
        }
        blobs.insert(digest.to_string(), data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn contains(&self, digest: &str) -> StoreResult<bool> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(digest))
    }

    fn download(&self, digest: &str, dest: &mut dyn Write) -> StoreResult<u64> {
        let data = self
            .blob(digest)
            .ok_or_else(|| StoreError::NotFound(format!("content {digest}")))?;
        dest.write_all(&data)
            .map_err(|e| StoreError::io(digest, e))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(data.len() as u64)
    }

    fn put_manifest(&self, digest: &str, document: &[u8]) -> StoreResult<String> {
        let url = format!("{MANIFEST_URL_PREFIX}{digest}");
        self.manifests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), document.to_vec());
        Ok(url)
    }

    fn get_manifest(&self, url: &str) -> StoreResult<Vec<u8>> {
        self.manifests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("manifest {url}")))
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blobs", &self.len())
            .field("uploads", &self.upload_count())
            .field("downloads", &self.download_count())
            .finish()
    }
}

struct StoredObject {
    data: Vec<u8>,
    etag: String,
    version_id: Option<String>,
}

/// In-memory stand-in for a bucket store or HTTP server.
///
/// Objects are keyed by their full URI. ETags are derived from the content,
/// so rewriting an object changes its ETag.
#[derive(Default)]
pub struct InMemoryObjectSource {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    fetches: AtomicUsize,
}

impl InMemoryObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the object at `uri`.
    pub fn put(&self, uri: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.insert(uri.into(), data.into(), None);
    }

    /// Create or replace the object at `uri` with an explicit version id.
    pub fn put_versioned(
        &self,
        uri: impl Into<String>,
        data: impl Into<Vec<u8>>,
        version_id: impl Into<String>,
    ) {
        self.insert(uri.into(), data.into(), Some(version_id.into()));
    }

    pub fn remove(&self, uri: &str) -> bool {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
            .is_some()
    }

    /// Number of `fetch` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn insert(&self, uri: String, data: Vec<u8>, version_id: Option<String>) {
        let etag = md5_bytes_b64(&data);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                uri,
                StoredObject {
                    data,
                    etag,
                    version_id,
                },
            );
    }

    fn meta(uri: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            uri: uri.to_string(),
            size: Some(obj.data.len() as u64),
            etag: Some(obj.etag.clone()),
            version_id: obj.version_id.clone(),
        }
    }
}

impl ObjectSource for InMemoryObjectSource {
    fn head(&self, uri: &str) -> StoreResult<ObjectMeta> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(uri)
            .map(|obj| Self::meta(uri, obj))
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))
    }

    fn list(&self, uri: &str, max: usize) -> StoreResult<Vec<ObjectMeta>> {
        let prefix = format!("{}/", uri.trim_end_matches('/'));
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .take(max)
            .map(|(key, obj)| Self::meta(key, obj))
            .collect())
    }

    fn fetch(&self, uri: &str, version_id: Option<&str>, dest: &mut dyn Write) -> StoreResult<u64> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let obj = objects
            .get(uri)
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))?;
        if let Some(wanted) = version_id {
            if obj.version_id.as_deref() != Some(wanted) {
                return Err(StoreError::NotFound(format!("{uri}?versionId={wanted}")));
            }
        }
        dest.write_all(&obj.data)
            .map_err(|e| StoreError::io(uri, e))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(obj.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Content store
    // -----------------------------------------------------------------------

    #[test]
    fn upload_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"abc").unwrap();
        let digest = md5_bytes_b64(b"abc");

        let store = InMemoryContentStore::new();
        assert!(store.upload(&digest, &src).unwrap());
        assert!(!store.upload(&digest, &src).unwrap());
        assert_eq!(store.upload_count(), 1);
        assert_eq!(store.len(), 1);

        let mut out = Vec::new();
        assert_eq!(store.download(&digest, &mut out).unwrap(), 3);
        assert_eq!(out, b"abc");
        assert_eq!(store.download_count(), 1);
    }

    #[test]
    fn missing_content_is_not_found() {
        let store = InMemoryContentStore::new();
        let mut out = Vec::new();
        assert!(matches!(
            store.download("nope", &mut out),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_manifest("memory://manifests/x"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn manifests_are_addressed_by_url() {
        let store = InMemoryContentStore::new();
        let url = store.put_manifest("d1", b"{}").unwrap();
        assert_eq!(url, "memory://manifests/d1");
        assert_eq!(store.get_manifest(&url).unwrap(), b"{}");
    }

    // -----------------------------------------------------------------------
    // Object source
    // -----------------------------------------------------------------------

    #[test]
    fn head_reports_size_and_etag() {
        let source = InMemoryObjectSource::new();
        source.put_versioned("s3://b/k", b"data".to_vec(), "v1");
        let meta = source.head("s3://b/k").unwrap();
        assert_eq!(meta.size, Some(4));
        assert_eq!(meta.etag.as_deref(), Some(md5_bytes_b64(b"data").as_str()));
        assert_eq!(meta.version_id.as_deref(), Some("v1"));
        assert!(matches!(source.head("s3://b/x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn etag_changes_with_content() {
        let source = InMemoryObjectSource::new();
        source.put("s3://b/k", b"one".to_vec());
        let first = source.head("s3://b/k").unwrap().etag;
        source.put("s3://b/k", b"two".to_vec());
        assert_ne!(source.head("s3://b/k").unwrap().etag, first);
    }

    #[test]
    fn list_respects_prefix_and_cap() {
        let source = InMemoryObjectSource::new();
        source.put("s3://b/dir/a", b"a".to_vec());
        source.put("s3://b/dir/b", b"b".to_vec());
        source.put("s3://b/dir/sub/c", b"c".to_vec());
        source.put("s3://b/dirty", b"x".to_vec());

        let all = source.list("s3://b/dir", 100).unwrap();
        let uris: Vec<&str> = all.iter().map(|m| m.uri.as_str()).collect();
        assert_eq!(uris, vec!["s3://b/dir/a", "s3://b/dir/b", "s3://b/dir/sub/c"]);
        assert_eq!(source.list("s3://b/dir/", 2).unwrap().len(), 2);
    }

    #[test]
    fn fetch_pins_version() {
        let source = InMemoryObjectSource::new();
        source.put_versioned("s3://b/k", b"v".to_vec(), "v2");
        let mut out = Vec::new();
        assert!(source.fetch("s3://b/k", Some("v1"), &mut out).is_err());
        source.fetch("s3://b/k", Some("v2"), &mut out).unwrap();
        assert_eq!(out, b"v");
        assert_eq!(source.fetch_count(), 1);
    }
}
