use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, Weak};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};
use vessel_cache::ArtifactsCache;
use vessel_crypto::md5_file_b64;
use vessel_manifest::{LogicalPath, Manifest, ManifestEntry};
use vessel_store::{
    ArtifactRefHandler, ArtifactResolver, ContentStore, InMemoryContentStore, LocalFileHandler,
    ObjectSource, RemoteObjectHandler, StagingArea, StoragePolicy, StoreError, StoreResult,
};
use vessel_types::{
    validate_artifact_name, validate_artifact_type, ArtifactId, ClientId, CollectionPath,
};

use crate::artifact::{Artifact, ArtifactCell, ArtifactInner, DEFAULT_ALIAS};
use crate::config::VesselConfig;
use crate::error::{ApiError, ArtifactError, ArtifactResult};
use crate::metadata::{ArtifactAttrs, CreateArtifact, InMemoryMetadataService, MetadataClient};

/// Bucket schemes served by the bucket handler unless configured otherwise.
pub const DEFAULT_BUCKET_SCHEMES: &[&str] = &["s3", "gs"];

/// A Vessel session: configuration, collaborators, worker pools and the
/// artifact registry.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct Vessel {
    inner: Arc<VesselInner>,
}

pub(crate) struct VesselInner {
    config: VesselConfig,
    client: Arc<dyn MetadataClient>,
    policy: StoragePolicy,
    cache: ArtifactsCache<ArtifactCell>,
    add_dir_pool: ThreadPool,
    download_pool: ThreadPool,
    upload_pool: ThreadPool,
    self_ref: Weak<VesselInner>,
}

/// Builder for [`Vessel`].
pub struct VesselBuilder {
    config: VesselConfig,
    client: Option<Arc<dyn MetadataClient>>,
    store: Option<Arc<dyn ContentStore>>,
    http_source: Option<Arc<dyn ObjectSource>>,
    bucket_source: Option<Arc<dyn ObjectSource>>,
    bucket_schemes: Vec<String>,
}

impl VesselBuilder {
    pub fn new(config: VesselConfig) -> Self {
        Self {
            config,
            client: None,
            store: None,
            http_source: None,
            bucket_source: None,
            bucket_schemes: DEFAULT_BUCKET_SCHEMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn metadata_client(mut self, client: Arc<dyn MetadataClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable `http`/`https` references served by `source`.
    pub fn http_source(mut self, source: Arc<dyn ObjectSource>) -> Self {
        self.http_source = Some(source);
        self
    }

    /// Enable bucket references served by `source`.
    pub fn bucket_source(mut self, source: Arc<dyn ObjectSource>) -> Self {
        self.bucket_source = Some(source);
        self
    }

    /// Schemes routed to the bucket source (default `s3`, `gs`).
    pub fn bucket_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bucket_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ArtifactResult<Vessel> {
        let Self {
            config,
            client,
            store,
            http_source,
            bucket_source,
            bucket_schemes,
        } = self;
        config.validate()?;
        let client =
            client.ok_or_else(|| ArtifactError::Config("no metadata client configured".into()))?;
        let store =
            store.ok_or_else(|| ArtifactError::Config("no content store configured".into()))?;

        let add_dir_pool = build_pool("vessel-add", config.add_dir_workers)?;
        let download_pool = build_pool("vessel-download", config.download_workers)?;
        let upload_pool = build_pool("vessel-upload", config.upload_workers)?;
        let cache = ArtifactsCache::new(config.content_cache_path());
        let staging = StagingArea::new(config.staging_path());

        let inner = Arc::new_cyclic(|weak: &Weak<VesselInner>| {
            let content = Arc::clone(cache.content());
            let resolver: Weak<dyn ArtifactResolver> = weak.clone();
            let mut policy = StoragePolicy::new(staging, store, Arc::clone(&content))
                .with_handler(ArtifactRefHandler::new(resolver))
                .with_handler(LocalFileHandler::new());
            if let Some(source) = http_source {
                policy.register(Box::new(RemoteObjectHandler::http(
                    source,
                    Arc::clone(&content),
                )));
            }
            if let Some(source) = bucket_source {
                policy.register(Box::new(RemoteObjectHandler::bucket(
                    bucket_schemes,
                    source,
                    content,
                    config.bucket_max_objects,
                )));
            }
            VesselInner {
                config,
                client,
                policy,
                cache,
                add_dir_pool,
                download_pool,
                upload_pool,
                self_ref: weak.clone(),
            }
        });
        info!(
            entity = %inner.config.entity,
            project = %inner.config.project,
            cache = %inner.config.cache_dir.display(),
            "vessel session ready"
        );
        Ok(Vessel { inner })
    }
}

fn build_pool(prefix: &'static str, threads: usize) -> ArtifactResult<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .map_err(|e| ArtifactError::Config(format!("{prefix} pool: {e}")))
}

impl Vessel {
    pub fn builder(config: VesselConfig) -> VesselBuilder {
        VesselBuilder::new(config)
    }

    /// A session backed by an in-memory metadata service and content store.
    pub fn in_memory(config: VesselConfig) -> ArtifactResult<Self> {
        Self::builder(config)
            .metadata_client(Arc::new(InMemoryMetadataService::new()))
            .content_store(Arc::new(InMemoryContentStore::new()))
            .build()
    }

    pub fn config(&self) -> &VesselConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &Arc<dyn MetadataClient> {
        &self.inner.client
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.inner.policy
    }

    pub fn cache(&self) -> &ArtifactsCache<ArtifactCell> {
        &self.inner.cache
    }

    pub(crate) fn add_dir_pool(&self) -> &ThreadPool {
        &self.inner.add_dir_pool
    }

    // ---- Artifact lookup ----

    /// Start a new draft artifact in the configured entity and project.
    pub fn new_artifact(&self, name: &str, artifact_type: &str) -> ArtifactResult<Artifact> {
        validate_artifact_name(name)?;
        validate_artifact_type(artifact_type)?;
        let inner = ArtifactInner::draft(
            name.to_string(),
            artifact_type.to_string(),
            self.inner.config.entity.clone(),
            self.inner.config.project.clone(),
        );
        Ok(self.register_draft(Arc::new(ArtifactCell::new(inner))))
    }

    pub(crate) fn register_draft(&self, cell: Arc<ArtifactCell>) -> Artifact {
        let client_id = cell
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .client_id;
        self.inner.cache.register_draft(client_id, &cell);
        debug!(client_id = %client_id, "draft registered");
        Artifact::from_cell(cell, self.clone())
    }

    /// A live draft created through this session.
    pub fn draft(&self, client_id: &ClientId) -> Option<Artifact> {
        self.inner
            .cache
            .draft(client_id)
            .map(|cell| Artifact::from_cell(cell, self.clone()))
    }

    /// Look up a committed artifact by `[[entity/]project/]name[:alias]`.
    ///
    /// The alias defaults to `latest`; version aliases such as `v2` work
    /// too.
    pub fn artifact(&self, name: &str) -> ArtifactResult<Artifact> {
        let (path, alias) = name.rsplit_once(':').unwrap_or((name, DEFAULT_ALIAS));
        let collection =
            CollectionPath::parse(path, &self.inner.config.entity, &self.inner.config.project)?;
        let attrs = self.inner.client.fetch_by_name(&collection, alias)?;
        self.hydrate(attrs)
    }

    /// Look up a committed artifact by server id.
    pub fn artifact_by_id(&self, id: &ArtifactId) -> ArtifactResult<Artifact> {
        if let Some(cell) = self.inner.cache.committed(id) {
            return Ok(Artifact::from_cell(cell, self.clone()));
        }
        let attrs = self.inner.client.fetch_by_id(id)?;
        self.hydrate(attrs)
    }

    /// The registered object for `attrs.id`, loading its manifest on first
    /// use.
    pub fn hydrate(&self, attrs: ArtifactAttrs) -> ArtifactResult<Artifact> {
        if let Some(cell) = self.inner.cache.committed(&attrs.id) {
            return Ok(Artifact::from_cell(cell, self.clone()));
        }
        let document = self
            .inner
            .policy
            .content_store()
            .get_manifest(&attrs.manifest_url)?;
        let manifest = Manifest::from_json_slice(&document)?;
        if manifest.digest() != attrs.digest {
            return Err(ArtifactError::DigestMismatch {
                path: attrs.manifest_url.clone(),
            });
        }
        let cell = Arc::new(ArtifactCell::new(ArtifactInner::committed(&attrs, manifest)));
        let cell = self.inner.cache.insert_committed(attrs.id.clone(), cell);
        debug!(id = %attrs.id, name = %attrs.source.qualified_name(), "artifact hydrated");
        Ok(Artifact::from_cell(cell, self.clone()))
    }

    // ---- Transfer ----

    /// Upload staged content and the manifest, then register the version.
    pub(crate) fn run_commit(
        &self,
        staged: &[ManifestEntry],
        document: &[u8],
        mut request: CreateArtifact,
    ) -> ArtifactResult<ArtifactAttrs> {
        let policy = &self.inner.policy;
        let uploaded = self.inner.upload_pool.install(|| {
            staged
                .par_iter()
                .map(|entry| policy.upload_staged(entry))
                .collect::<StoreResult<Vec<bool>>>()
        })?;
        let transferred = uploaded.iter().filter(|u| **u).count();

        request.manifest_url = policy
            .content_store()
            .put_manifest(&request.digest, document)?;
        let attrs = self.inner.client.create_or_fetch_artifact(&request)?;
        debug!(
            collection = %request.collection,
            staged = staged.len(),
            transferred,
            "commit uploaded"
        );
        Ok(attrs)
    }

    /// Write every entry under `root` on the download pool.
    pub(crate) fn download_entries(&self, entries: &[ManifestEntry], root: &Path) -> ArtifactResult<()> {
        self.inner.download_pool.install(|| {
            entries
                .par_iter()
                .try_for_each(|entry| self.materialize_entry(entry, root).map(|_| ()))
        })
    }

    /// Place the content of `entry` at its path under `root`.
    ///
    /// A file already holding the right content is left as is.
    pub(crate) fn materialize_entry(&self, entry: &ManifestEntry, root: &Path) -> ArtifactResult<PathBuf> {
        let dest = entry.path.to_fs_path(root);
        if !entry.is_reference() && dest.is_file() {
            let current = md5_file_b64(&dest).map_err(|e| ArtifactError::io(&dest, e))?;
            if current == entry.digest {
                return Ok(dest);
            }
        }

        let src = self.inner.policy.load_path(entry)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
        }
        match fs::remove_file(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ArtifactError::io(&dest, e)),
        }
        let mut reader = File::open(&src).map_err(|e| ArtifactError::io(&src, e))?;
        let mut writer = File::create(&dest).map_err(|e| ArtifactError::io(&dest, e))?;
        io::copy(&mut reader, &mut writer).map_err(|e| ArtifactError::io(&dest, e))?;
        debug!(path = %entry.path, dest = %dest.display(), "entry downloaded");
        Ok(dest)
    }
}

impl VesselInner {
    fn session(&self) -> StoreResult<Vessel> {
        self.self_ref
            .upgrade()
            .map(|inner| Vessel { inner })
            .ok_or(StoreError::ResolverUnavailable)
    }
}

impl ArtifactResolver for VesselInner {
    fn resolve_entry(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<ManifestEntry> {
        let artifact = self.session()?.artifact_by_id(id).map_err(into_store_error)?;
        artifact.entry(path).map_err(into_store_error)
    }

    fn materialize(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<PathBuf> {
        let entry = self.resolve_entry(id, path)?;
        self.policy.load_path(&entry)
    }
}

fn into_store_error(e: ArtifactError) -> StoreError {
    match e {
        ArtifactError::Store(e) => e,
        ArtifactError::PathNotFound(what) | ArtifactError::Remote(ApiError::NotFound(what)) => {
            StoreError::NotFound(what)
        }
        other => StoreError::Artifact(other.to_string()),
    }
}

impl fmt::Debug for Vessel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vessel")
            .field("entity", &self.inner.config.entity)
            .field("project", &self.inner.config.project)
            .field("policy", &self.inner.policy)
            .field("cache", &self.inner.cache)
            .finish()
    }
}
