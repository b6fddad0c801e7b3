use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use vessel_cache::{CacheKey, ContentCache};
use vessel_manifest::{LogicalPath, ManifestEntry};

use crate::error::{StoreError, StoreResult};
use crate::handler::StorageHandler;
use crate::source::{ObjectMeta, ObjectSource};
use crate::uri::basename;

/// Default prefix expansion cap for bucket stores.
pub const DEFAULT_BUCKET_MAX_OBJECTS: usize = 10_000;

const ETAG_KEY: &str = "etag";
const VERSION_KEY: &str = "versionID";

/// Handler for objects behind an [`ObjectSource`]: HTTP(S) servers and
/// bucket stores such as `s3://` and `gs://`.
///
/// Storing a reference only reads object metadata. Content is fetched on
/// load through the content cache, keyed by `(uri, etag)`.
pub struct RemoteObjectHandler {
    name: &'static str,
    schemes: Vec<String>,
    source: Arc<dyn ObjectSource>,
    cache: Arc<ContentCache>,
    listing: bool,
    default_max_objects: Option<usize>,
}

impl RemoteObjectHandler {
    /// Handler for `http` and `https`. Every reference is a single object.
    pub fn http(source: Arc<dyn ObjectSource>, cache: Arc<ContentCache>) -> Self {
        Self {
            name: "http",
            schemes: vec!["http".into(), "https".into()],
            source,
            cache,
            listing: false,
            default_max_objects: None,
        }
    }

    /// Handler for bucket schemes. A reference that is not an object is
    /// expanded as a prefix, up to `default_max_objects` unless the caller
    /// passes its own cap.
    pub fn bucket<I, S>(
        schemes: I,
        source: Arc<dyn ObjectSource>,
        cache: Arc<ContentCache>,
        default_max_objects: usize,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "bucket",
            schemes: schemes.into_iter().map(Into::into).collect(),
            source,
            cache,
            listing: true,
            default_max_objects: Some(default_max_objects),
        }
    }

    fn entry_for(&self, meta: ObjectMeta, path: LogicalPath, checksum: bool) -> ManifestEntry {
        let digest = match (&meta.etag, checksum) {
            (Some(etag), true) => etag.clone(),
            _ => meta.uri.clone(),
        };
        let mut entry = ManifestEntry::reference(path, meta.uri, digest, meta.size);
        if checksum {
            if let Some(etag) = meta.etag {
                entry = entry.with_extra(ETAG_KEY, etag);
            }
            if let Some(version) = meta.version_id {
                entry = entry.with_extra(VERSION_KEY, version);
            }
        }
        entry
    }

    fn single_name(uri: &str, name: Option<&LogicalPath>) -> StoreResult<LogicalPath> {
        match name {
            Some(name) => Ok(name.clone()),
            None => {
                let base = basename(uri)
                    .ok_or_else(|| StoreError::invalid(uri, "cannot derive an entry name"))?;
                Ok(LogicalPath::new(base)?)
            }
        }
    }
}

impl StorageHandler for RemoteObjectHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s == scheme)
    }

    fn store_reference(
        &self,
        uri: &str,
        name: Option<&LogicalPath>,
        checksum: bool,
        max_objects: Option<usize>,
    ) -> StoreResult<Vec<ManifestEntry>> {
        if !checksum {
            let path = Self::single_name(uri, name)?;
            return Ok(vec![self.entry_for(ObjectMeta::new(uri), path, false)]);
        }

        let head = match self.source.head(uri) {
            Ok(meta) => Some(meta),
            Err(StoreError::NotFound(_)) if self.listing => None,
            Err(e) => return Err(e),
        };
        if let Some(meta) = head {
            let path = Self::single_name(uri, name)?;
            return Ok(vec![self.entry_for(meta, path, true)]);
        }

        let limit = max_objects
            .or(self.default_max_objects)
            .unwrap_or(usize::MAX);
        let objects = self.source.list(uri, limit)?;
        if objects.is_empty() {
            return Err(StoreError::NotFound(uri.to_string()));
        }
        if objects.len() >= limit {
            warn!(uri, max_objects = limit, "reference prefix listing capped");
        }

        let prefix = uri.trim_end_matches('/');
        let mut entries = Vec::with_capacity(objects.len());
        for meta in objects {
            let rel = meta
                .uri
                .strip_prefix(prefix)
                .unwrap_or(&meta.uri)
                .trim_start_matches('/')
                .to_string();
            let path = match name {
                Some(base) => base.join(&rel)?,
                None => LogicalPath::new(&rel)?,
            };
            entries.push(self.entry_for(meta, path, true));
        }
        debug!(uri, count = entries.len(), handler = self.name, "stored prefix reference");
        Ok(entries)
    }

    fn load_path(&self, entry: &ManifestEntry) -> StoreResult<PathBuf> {
        let uri = entry
            .reference
            .as_deref()
            .ok_or_else(|| StoreError::invalid(entry.path.as_str(), "not a reference entry"))?;
        let etag = entry
            .extra
            .get(ETAG_KEY)
            .and_then(Value::as_str)
            .unwrap_or(entry.digest.as_str());
        let version = entry.extra.get(VERSION_KEY).and_then(Value::as_str);

        let key = CacheKey::for_remote(uri, etag);
        self.cache.fetch(&key, entry.size, |dest: &mut File| {
            self.source.fetch(uri, version, dest)?;
            Ok::<(), StoreError>(())
        })
    }
}

impl std::fmt::Debug for RemoteObjectHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectHandler")
            .field("name", &self.name)
            .field("schemes", &self.schemes)
            .field("default_max_objects", &self.default_max_objects)
            .finish()
    }
}
