use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use vessel_manifest::{LogicalPath, Manifest, ManifestEntry};
use vessel_store::{parse_artifact_ref, StagedEntry, StoreError, ARTIFACT_SCHEME};
use vessel_types::{
    validate_alias, ArtifactId, ArtifactState, ClientId, CollectionMembership, CollectionPath,
    RunRef,
};
use walkdir::WalkDir;

use crate::error::{ArtifactError, ArtifactResult};
use crate::metadata::ArtifactAttrs;
use crate::session::Vessel;

/// Upper bound on top-level metadata keys.
pub const MAX_METADATA_KEYS: usize = 100;

/// Alias every new draft starts with.
pub const DEFAULT_ALIAS: &str = "latest";

pub(crate) type CommitOutcome = ArtifactResult<ArtifactAttrs>;

/// Shared state behind every [`Artifact`] handle for one artifact object.
///
/// Lock order is `pending` before `inner`.
pub struct ArtifactCell {
    pub(crate) inner: RwLock<ArtifactInner>,
    pub(crate) pending: Mutex<Option<Receiver<CommitOutcome>>>,
}

impl ArtifactCell {
    pub(crate) fn new(inner: ArtifactInner) -> Self {
        Self {
            inner: RwLock::new(inner),
            pending: Mutex::new(None),
        }
    }
}

/// Identity assigned by the metadata service on commit.
#[derive(Clone, Debug)]
pub(crate) struct ServerIdentity {
    pub(crate) id: ArtifactId,
    pub(crate) source: CollectionMembership,
    pub(crate) commit_hash: String,
    pub(crate) manifest_url: String,
    pub(crate) file_count: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl From<&ArtifactAttrs> for ServerIdentity {
    fn from(attrs: &ArtifactAttrs) -> Self {
        Self {
            id: attrs.id.clone(),
            source: attrs.source.clone(),
            commit_hash: attrs.commit_hash.clone(),
            manifest_url: attrs.manifest_url.clone(),
            file_count: attrs.file_count,
            created_at: attrs.created_at,
            updated_at: attrs.updated_at,
        }
    }
}

pub(crate) struct ArtifactInner {
    pub(crate) client_id: ClientId,
    pub(crate) name: String,
    pub(crate) artifact_type: String,
    pub(crate) entity: String,
    pub(crate) project: String,
    pub(crate) description: Option<String>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) aliases: BTreeSet<String>,
    /// Aliases as last synced with the service.
    pub(crate) saved_aliases: BTreeSet<String>,
    pub(crate) manifest: Manifest,
    pub(crate) state: ArtifactState,
    pub(crate) finalized: bool,
    pub(crate) identity: Option<ServerIdentity>,
    pub(crate) membership: Option<CollectionMembership>,
    pub(crate) dependents: BTreeSet<ArtifactId>,
    pub(crate) added_local_paths: HashMap<PathBuf, LogicalPath>,
    pub(crate) run: Option<RunRef>,
}

impl ArtifactInner {
    pub(crate) fn draft(name: String, artifact_type: String, entity: String, project: String) -> Self {
        Self {
            client_id: ClientId::generate(),
            name,
            artifact_type,
            entity,
            project,
            description: None,
            metadata: Map::new(),
            aliases: BTreeSet::from([DEFAULT_ALIAS.to_string()]),
            saved_aliases: BTreeSet::new(),
            manifest: Manifest::new(),
            state: ArtifactState::Draft,
            finalized: false,
            identity: None,
            membership: None,
            dependents: BTreeSet::new(),
            added_local_paths: HashMap::new(),
            run: None,
        }
    }

    /// A committed artifact as described by the service.
    pub(crate) fn committed(attrs: &ArtifactAttrs, manifest: Manifest) -> Self {
        let aliases: BTreeSet<String> = attrs.aliases.iter().cloned().collect();
        let dependents = cross_artifact_targets(manifest.entries());
        Self {
            client_id: ClientId::generate(),
            name: attrs.source.collection.clone(),
            artifact_type: attrs.artifact_type.clone(),
            entity: attrs.source.entity.clone(),
            project: attrs.source.project.clone(),
            description: attrs.description.clone(),
            metadata: attrs.metadata.clone(),
            saved_aliases: aliases.clone(),
            aliases,
            manifest,
            state: ArtifactState::Committed,
            finalized: true,
            identity: Some(ServerIdentity::from(attrs)),
            membership: attrs.membership.clone(),
            dependents,
            added_local_paths: HashMap::new(),
            run: None,
        }
    }

    /// Fails unless the manifest may still change.
    pub(crate) fn ensure_can_add(&self) -> ArtifactResult<()> {
        if self.finalized || !self.state.is_draft() {
            return Err(ArtifactError::Finalized);
        }
        Ok(())
    }

    /// Server identity, or `NotLogged` while the artifact is a draft.
    pub(crate) fn identity(&self, op: &'static str) -> ArtifactResult<&ServerIdentity> {
        self.identity.as_ref().ok_or(ArtifactError::NotLogged { op })
    }

    /// Server identity of an artifact that has not been deleted.
    pub(crate) fn ensure_live(&self, op: &'static str) -> ArtifactResult<&ServerIdentity> {
        if self.state == ArtifactState::Deleted {
            return Err(ArtifactError::InvalidState(format!(
                "'{op}' is not allowed on a deleted artifact"
            )));
        }
        self.identity(op)
    }

    fn ensure_editable(&self) -> ArtifactResult<()> {
        match self.state {
            ArtifactState::Deleted => Err(ArtifactError::InvalidState(
                "artifact has been deleted".into(),
            )),
            ArtifactState::Draft if self.finalized => Err(ArtifactError::Finalized),
            _ => Ok(()),
        }
    }

    pub(crate) fn collection_path(&self) -> CollectionPath {
        CollectionPath::new(&self.entity, &self.project, &self.name)
    }

    /// Reject any entry that would conflict with the manifest, then add all.
    fn add_entries(&mut self, entries: Vec<ManifestEntry>) -> ArtifactResult<Vec<ManifestEntry>> {
        let mut probe = Manifest::new();
        for entry in &entries {
            if let Some(existing) = self.manifest.get(entry.path.as_str()) {
                probe.insert(existing.clone());
            }
            probe.add_entry(entry.clone())?;
        }
        self.dependents.extend(cross_artifact_targets(entries.iter()));
        entries
            .into_iter()
            .map(|entry| self.manifest.add_entry(entry).map_err(ArtifactError::from))
            .collect()
    }
}

/// Ids of the artifacts that cross-artifact entries point into.
pub(crate) fn cross_artifact_targets<'a>(
    entries: impl Iterator<Item = &'a ManifestEntry>,
) -> BTreeSet<ArtifactId> {
    entries
        .filter(|e| e.reference_scheme() == Some(ARTIFACT_SCHEME))
        .filter_map(|e| e.reference.as_deref())
        .filter_map(|uri| parse_artifact_ref(uri).ok())
        .map(|(id, _)| id)
        .collect()
}

/// Handle to an artifact.
///
/// Handles are cheap to clone and share state: every handle for the same
/// committed artifact obtained through one [`Vessel`] points at the same
/// object (see [`Artifact::ptr_eq`]).
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use vessel_sdk::{Vessel, VesselConfig};
///
/// # fn main() -> Result<(), vessel_sdk::ArtifactError> {
/// let vessel = Vessel::in_memory(VesselConfig::rooted_at(Path::new("/tmp/vessel")))?;
/// let artifact = vessel.new_artifact("mnist", "dataset")?;
/// artifact.add_dir(Path::new("data/mnist"), None)?;
/// artifact.commit()?;
/// println!("logged {}", artifact.qualified_name()?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Artifact {
    pub(crate) cell: Arc<ArtifactCell>,
    pub(crate) session: Vessel,
}

impl Artifact {
    pub(crate) fn from_cell(cell: Arc<ArtifactCell>, session: Vessel) -> Self {
        Self { cell, session }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ArtifactInner> {
        self.cell.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ArtifactInner> {
        self.cell.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if both handles refer to the same artifact object.
    pub fn ptr_eq(&self, other: &Artifact) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    // ---- Adding content ----

    /// Add a local file at `name` (default: its file name).
    ///
    /// The file is copied into the staging area immediately, so later edits
    /// to `local_path` do not affect the artifact. Adding the same content at
    /// the same name again returns the existing entry.
    pub fn add_file(&self, local_path: &Path, name: Option<&str>) -> ArtifactResult<ManifestEntry> {
        self.read().ensure_can_add()?;
        let meta = metadata_of(local_path)?;
        if !meta.is_file() {
            return Err(ArtifactError::NotAFile(local_path.to_path_buf()));
        }
        let name = match name {
            Some(name) => LogicalPath::new(name)?,
            None => LogicalPath::new(file_name_of(local_path)?)?,
        };
        let staged = self.session.policy().store_file(local_path, name)?;
        let mut added = self.register_staged(vec![(staged, Some(local_path.to_path_buf()))])?;
        added
            .pop()
            .ok_or_else(|| ArtifactError::Internal("staged entry vanished".into()))
    }

    /// Add every regular file under `local_path`, placed under `name` if
    /// given. Symlinks are followed.
    ///
    /// Files are staged in parallel on the session's add-dir pool. Any
    /// failure fails the whole call and leaves the manifest unchanged.
    pub fn add_dir(&self, local_path: &Path, name: Option<&str>) -> ArtifactResult<Vec<ManifestEntry>> {
        self.read().ensure_can_add()?;
        if !metadata_of(local_path)?.is_dir() {
            return Err(ArtifactError::NotADirectory(local_path.to_path_buf()));
        }
        let prefix = name.map(LogicalPath::new).transpose()?;

        let mut files = Vec::new();
        for item in WalkDir::new(local_path).follow_links(true).sort_by_file_name() {
            let item = item.map_err(|e| {
                let path = e.path().unwrap_or(local_path).to_path_buf();
                ArtifactError::io(path, io::Error::from(e))
            })?;
            if !item.file_type().is_file() {
                continue;
            }
            let rel = item
                .path()
                .strip_prefix(local_path)
                .map_err(|e| ArtifactError::Internal(e.to_string()))?;
            let logical = LogicalPath::from_relative(rel)?;
            let logical = match &prefix {
                Some(prefix) => prefix.join(logical.as_str())?,
                None => logical,
            };
            files.push((item.into_path(), logical));
        }

        let policy = self.session.policy();
        let staged = self.session.add_dir_pool().install(|| {
            files
                .into_par_iter()
                .map(|(abs, logical)| -> ArtifactResult<(StagedEntry, Option<PathBuf>)> {
                    let staged = policy.store_file(&abs, logical)?;
                    Ok((staged, Some(abs)))
                })
                .collect::<ArtifactResult<Vec<_>>>()
        })?;
        let added = self.register_staged(staged)?;
        debug!(dir = %local_path.display(), files = added.len(), "directory added");
        Ok(added)
    }

    /// Add a reference to content that stays where it is.
    ///
    /// `uri` must carry a scheme. `checksum` asks the handler for a content
    /// digest instead of using the URI as one; `max_objects` caps prefix
    /// expansion.
    pub fn add_reference(
        &self,
        uri: &str,
        name: Option<&str>,
        checksum: bool,
        max_objects: Option<usize>,
    ) -> ArtifactResult<Vec<ManifestEntry>> {
        self.read().ensure_can_add()?;
        let name = name.map(LogicalPath::new).transpose()?;
        let entries = self
            .session
            .policy()
            .store_reference(uri, name.as_ref(), checksum, max_objects)?;
        let mut inner = self.write();
        inner.ensure_can_add()?;
        inner.add_entries(entries)
    }

    /// Create a file at `name` whose content is produced by `write`.
    ///
    /// Only a fully written file is added; if `write` fails nothing is left
    /// behind.
    pub fn new_file<F>(&self, name: &str, write: F) -> ArtifactResult<ManifestEntry>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let path = LogicalPath::new(name)?;
        {
            let inner = self.read();
            inner.ensure_can_add()?;
            if inner.manifest.contains(path.as_str()) {
                return Err(ArtifactError::InvalidState(format!(
                    "a file named {path} already exists"
                )));
            }
        }
        let staging_dir = self.session.policy().staging().dir().to_path_buf();
        let staged = self
            .session
            .policy()
            .store_with(path, |file| write(file).map_err(|e| StoreError::io(&staging_dir, e)))?;
        let mut added = self.register_staged(vec![(staged, None)])?;
        added
            .pop()
            .ok_or_else(|| ArtifactError::Internal("staged entry vanished".into()))
    }

    /// Register staged copies in the manifest.
    ///
    /// Identical re-adds return the existing entry and drop their copy.
    fn register_staged(
        &self,
        staged: Vec<(StagedEntry, Option<PathBuf>)>,
    ) -> ArtifactResult<Vec<ManifestEntry>> {
        let mut inner = self.write();
        inner.ensure_can_add()?;

        let candidates: Vec<ManifestEntry> = staged
            .iter()
            .map(|(s, _)| ManifestEntry::new(s.path().clone(), s.digest(), s.size()))
            .collect();
        let mut probe = Manifest::new();
        for candidate in &candidates {
            if let Some(existing) = inner.manifest.get(candidate.path.as_str()) {
                probe.insert(existing.clone());
            }
            probe.add_entry(candidate.clone())?;
        }

        let mut added = Vec::with_capacity(staged.len());
        for (entry, source) in staged {
            let path = entry.path().clone();
            let existing = inner.manifest.get(path.as_str()).cloned();
            let result = match existing {
                Some(existing) => {
                    debug!(path = %path, "identical content already present");
                    existing
                }
                None => inner.manifest.add_entry(entry.keep()?)?,
            };
            if let Some(source) = source {
                inner.added_local_paths.insert(source, path);
            }
            added.push(result);
        }
        Ok(added)
    }

    // ---- Editable fields ----

    pub fn set_description(&self, description: Option<&str>) -> ArtifactResult<()> {
        let mut inner = self.write();
        inner.ensure_editable()?;
        inner.description = description.map(str::to_string);
        Ok(())
    }

    /// Replace the metadata with `metadata`, which must serialize to a JSON
    /// object of at most [`MAX_METADATA_KEYS`] keys.
    pub fn set_metadata<M: Serialize>(&self, metadata: &M) -> ArtifactResult<()> {
        let value = serde_json::to_value(metadata)
            .map_err(|e| ArtifactError::InvalidMetadata(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(ArtifactError::InvalidMetadata(
                "metadata must be a JSON object".into(),
            ));
        };
        if map.len() > MAX_METADATA_KEYS {
            return Err(ArtifactError::InvalidMetadata(format!(
                "{} keys exceeds the limit of {MAX_METADATA_KEYS}",
                map.len()
            )));
        }
        let mut inner = self.write();
        inner.ensure_editable()?;
        inner.metadata = map;
        Ok(())
    }

    pub fn add_alias(&self, alias: &str) -> ArtifactResult<()> {
        validate_alias(alias)?;
        let mut inner = self.write();
        inner.ensure_editable()?;
        inner.aliases.insert(alias.to_string());
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> ArtifactResult<()> {
        let mut inner = self.write();
        inner.ensure_editable()?;
        inner.aliases.remove(alias);
        Ok(())
    }

    /// Record the run producing this artifact. Drafts only.
    pub fn set_logged_by(&self, run: RunRef) -> ArtifactResult<()> {
        let mut inner = self.write();
        inner.ensure_can_add()?;
        inner.run = Some(run);
        Ok(())
    }

    // ---- Queries ----

    pub fn client_id(&self) -> ClientId {
        self.read().client_id
    }

    /// Server id, once committed.
    pub fn id(&self) -> Option<ArtifactId> {
        self.read().identity.as_ref().map(|i| i.id.clone())
    }

    /// `name:vN` once committed, the bare collection name before.
    pub fn name(&self) -> String {
        let inner = self.read();
        match &inner.identity {
            Some(identity) => identity.source.name(),
            None => inner.name.clone(),
        }
    }

    pub fn collection_name(&self) -> String {
        self.read().name.clone()
    }

    pub fn artifact_type(&self) -> String {
        self.read().artifact_type.clone()
    }

    pub fn description(&self) -> Option<String> {
        self.read().description.clone()
    }

    pub fn metadata(&self) -> Map<String, Value> {
        self.read().metadata.clone()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.read().aliases.iter().cloned().collect()
    }

    pub fn state(&self) -> ArtifactState {
        self.read().state
    }

    pub fn is_final(&self) -> bool {
        self.read().finalized
    }

    /// Freeze the manifest of a draft; a later `save` commits it as is.
    pub fn finalize(&self) -> ArtifactResult<()> {
        let mut inner = self.write();
        if !inner.state.is_draft() {
            return Err(ArtifactError::InvalidState(
                "only a draft can be finalized".into(),
            ));
        }
        inner.finalized = true;
        Ok(())
    }

    /// Snapshot of the manifest.
    pub fn manifest(&self) -> Manifest {
        self.read().manifest.clone()
    }

    /// Manifest digest.
    pub fn digest(&self) -> String {
        self.read().manifest.digest()
    }

    /// Sum of known entry sizes.
    pub fn size(&self) -> u64 {
        self.read().manifest.size()
    }

    /// `entity/project/name:vN` in the source collection.
    pub fn qualified_name(&self) -> ArtifactResult<String> {
        Ok(self.read().identity("qualified_name")?.source.qualified_name())
    }

    /// Version alias in the collection this handle was fetched through.
    pub fn version(&self) -> ArtifactResult<String> {
        let inner = self.read();
        let identity = inner.identity("version")?;
        Ok(inner
            .membership
            .as_ref()
            .unwrap_or(&identity.source)
            .version())
    }

    /// Version alias in the source collection.
    pub fn source_version(&self) -> ArtifactResult<String> {
        Ok(self.read().identity("source_version")?.source.version())
    }

    pub fn source(&self) -> ArtifactResult<CollectionMembership> {
        Ok(self.read().identity("source")?.source.clone())
    }

    pub fn file_count(&self) -> ArtifactResult<u64> {
        Ok(self.read().identity("file_count")?.file_count)
    }

    pub fn commit_hash(&self) -> ArtifactResult<String> {
        Ok(self.read().identity("commit_hash")?.commit_hash.clone())
    }

    pub fn created_at(&self) -> ArtifactResult<DateTime<Utc>> {
        Ok(self.read().identity("created_at")?.created_at)
    }

    pub fn updated_at(&self) -> ArtifactResult<DateTime<Utc>> {
        Ok(self.read().identity("updated_at")?.updated_at)
    }

    /// Artifacts this one references entries of.
    pub fn dependent_artifacts(&self) -> BTreeSet<ArtifactId> {
        self.read().dependents.clone()
    }

    /// The logical path a local file was added under, if it was.
    pub fn get_added_local_path_name(&self, local_path: &Path) -> Option<String> {
        self.read()
            .added_local_paths
            .get(local_path)
            .map(|p| p.to_string())
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Artifact")
            .field("client_id", &inner.client_id)
            .field("id", &inner.identity.as_ref().map(|i| &i.id))
            .field("name", &inner.name)
            .field("type", &inner.artifact_type)
            .field("state", &inner.state)
            .field("entries", &inner.manifest.len())
            .finish()
    }
}

fn metadata_of(path: &Path) -> ArtifactResult<fs::Metadata> {
    fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ArtifactError::PathNotFound(path.display().to_string()),
        _ => ArtifactError::io(path, e),
    })
}

fn file_name_of(path: &Path) -> ArtifactResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ArtifactError::NotAFile(path.to_path_buf()))
}
