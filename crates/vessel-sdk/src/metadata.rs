//! The metadata service interface and an in-memory implementation.
//!
//! The metadata service owns artifact identity: it assigns server ids and
//! version numbers, keeps aliases unique within a collection, and records
//! which runs produced and consumed each artifact.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use vessel_crypto::ContentHasher;
use vessel_types::{
    is_version_alias, ArtifactId, ArtifactState, ClientId, CollectionMembership, CollectionPath,
    RunRef,
};

use crate::error::{ApiError, ApiResult};

const COMMIT_HASHER: ContentHasher = ContentHasher::new("vessel-commit-v1");

/// Request to create an artifact version, or fetch the existing one with
/// the same digest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateArtifact {
    pub client_id: ClientId,
    pub collection: CollectionPath,
    pub artifact_type: String,
    pub digest: String,
    pub manifest_url: String,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    pub aliases: Vec<String>,
    pub file_count: u64,
    pub size: u64,
    pub run: Option<RunRef>,
}

/// Server-side view of one artifact version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactAttrs {
    pub id: ArtifactId,
    pub artifact_type: String,
    pub digest: String,
    pub commit_hash: String,
    pub manifest_url: String,
    pub source: CollectionMembership,
    /// Set when the artifact was fetched through a portfolio it is linked
    /// into rather than its source collection.
    #[serde(default)]
    pub membership: Option<CollectionMembership>,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    /// Aliases held in the source collection, version aliases excluded.
    pub aliases: Vec<String>,
    pub file_count: u64,
    pub size: u64,
    pub state: ArtifactState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Synchronous client for the artifact metadata service.
pub trait MetadataClient: Send + Sync {
    /// Create a new version in the request's collection, or return the
    /// latest version when its digest matches.
    fn create_or_fetch_artifact(&self, request: &CreateArtifact) -> ApiResult<ArtifactAttrs>;

    fn fetch_by_id(&self, id: &ArtifactId) -> ApiResult<ArtifactAttrs>;

    /// Fetch by alias or version alias (`v3`) within a collection.
    fn fetch_by_name(&self, collection: &CollectionPath, alias: &str) -> ApiResult<ArtifactAttrs>;

    fn add_aliases(
        &self,
        id: &ArtifactId,
        collection: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<()>;

    fn delete_aliases(
        &self,
        id: &ArtifactId,
        collection: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<()>;

    /// Replace description and metadata wholesale.
    fn update_fields(
        &self,
        id: &ArtifactId,
        description: Option<&str>,
        metadata: &Map<String, Value>,
    ) -> ApiResult<()>;

    /// Link into a portfolio collection. Returns the version index within it.
    fn link(&self, id: &ArtifactId, portfolio: &CollectionPath, aliases: &[String])
        -> ApiResult<u64>;

    /// Delete an artifact. Fails if it still holds aliases unless
    /// `delete_aliases` is set.
    fn delete(&self, id: &ArtifactId, delete_aliases: bool) -> ApiResult<()>;

    fn used_by(&self, id: &ArtifactId) -> ApiResult<Vec<RunRef>>;

    fn logged_by(&self, id: &ArtifactId) -> ApiResult<Option<RunRef>>;
}

// ---------------------------------------------------------------------------
// In-memory service
// ---------------------------------------------------------------------------

struct Record {
    artifact_type: String,
    digest: String,
    commit_hash: String,
    manifest_url: String,
    source: CollectionMembership,
    description: Option<String>,
    metadata: Map<String, Value>,
    file_count: u64,
    size: u64,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    logged_by: Option<RunRef>,
    used_by: Vec<RunRef>,
}

#[derive(Default)]
struct Collection {
    versions: Vec<ArtifactId>,
    aliases: BTreeMap<String, ArtifactId>,
}

#[derive(Default)]
struct State {
    artifacts: HashMap<ArtifactId, Record>,
    collections: HashMap<CollectionPath, Collection>,
    next_id: u64,
}

impl State {
    fn live(&self, id: &ArtifactId) -> ApiResult<&Record> {
        match self.artifacts.get(id) {
            Some(record) if !record.deleted => Ok(record),
            _ => Err(ApiError::NotFound(format!("artifact {id}"))),
        }
    }

    fn live_mut(&mut self, id: &ArtifactId) -> ApiResult<&mut Record> {
        match self.artifacts.get_mut(id) {
            Some(record) if !record.deleted => Ok(record),
            _ => Err(ApiError::NotFound(format!("artifact {id}"))),
        }
    }

    fn attrs(&self, id: &ArtifactId) -> ApiResult<ArtifactAttrs> {
        let record = self.live(id)?;
        let aliases = self
            .collections
            .get(&record.source.collection_path())
            .map(|c| {
                c.aliases
                    .iter()
                    .filter(|(_, holder)| *holder == id)
                    .map(|(alias, _)| alias.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ArtifactAttrs {
            id: id.clone(),
            artifact_type: record.artifact_type.clone(),
            digest: record.digest.clone(),
            commit_hash: record.commit_hash.clone(),
            manifest_url: record.manifest_url.clone(),
            source: record.source.clone(),
            membership: None,
            description: record.description.clone(),
            metadata: record.metadata.clone(),
            aliases,
            file_count: record.file_count,
            size: record.size,
            state: ArtifactState::Committed,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Point each alias at `id`, taking it from any previous holder.
    fn assign_aliases(
        &mut self,
        id: &ArtifactId,
        collection: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<()> {
        if let Some(alias) = aliases.iter().find(|a| is_version_alias(a)) {
            return Err(ApiError::InvalidRequest(format!(
                "version alias {alias} cannot be assigned"
            )));
        }
        let coll = self.collections.entry(collection.clone()).or_default();
        if !coll.versions.contains(id) {
            return Err(ApiError::InvalidRequest(format!(
                "artifact {id} is not a member of {collection}"
            )));
        }
        for alias in aliases {
            coll.aliases.insert(alias.clone(), id.clone());
        }
        Ok(())
    }

    fn holds_aliases(&self, id: &ArtifactId) -> bool {
        self.collections
            .values()
            .any(|c| c.aliases.values().any(|holder| holder == id))
    }
}

/// In-memory metadata service for tests and embedding.
///
/// - A create request whose digest matches the latest live version of the
///   same collection returns that version instead of creating a new one.
/// - Aliases are unique per collection; assigning one moves it to the new
///   holder.
/// - Version indices are never reused, even after deletion.
#[derive(Default)]
pub struct InMemoryMetadataService {
    state: RwLock<State>,
}

impl InMemoryMetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `run` consumed artifact `id`.
    pub fn record_use(&self, id: &ArtifactId, run: RunRef) -> ApiResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.live_mut(id)?.used_by.push(run);
        Ok(())
    }

    /// Number of live artifact versions.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .artifacts
            .values()
            .filter(|r| !r.deleted)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataClient for InMemoryMetadataService {
    fn create_or_fetch_artifact(&self, request: &CreateArtifact) -> ApiResult<ArtifactAttrs> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let State {
            artifacts,
            collections,
            next_id,
        } = &mut *state;
        let coll = collections.entry(request.collection.clone()).or_default();

        // Only the newest live version can absorb a commit; A -> B -> A
        // creates a third version.
        let existing = coll
            .versions
            .iter()
            .rev()
            .find(|id| artifacts.get(*id).is_some_and(|r| !r.deleted))
            .filter(|id| artifacts.get(*id).is_some_and(|r| r.digest == request.digest))
            .cloned();

        let id = match existing {
            Some(id) => {
                debug!(id = %id, digest = %request.digest, "digest matches existing version");
                id
            }
            None => {
                if let Some(other) = artifacts.values().find(|r| {
                    r.source.collection_path() == request.collection
                        && r.artifact_type != request.artifact_type
                }) {
                    return Err(ApiError::Conflict(format!(
                        "collection {} holds artifacts of type {}",
                        request.collection, other.artifact_type
                    )));
                }
                *next_id += 1;
                let id = ArtifactId::new(format!("artifact-{next_id}"));
                let version_index = coll.versions.len() as u64;
                coll.versions.push(id.clone());
                let now = Utc::now();
                let commit_hash =
                    COMMIT_HASHER.hash_hex(format!("{id}\0{}", request.digest).as_bytes())[..12]
                        .to_string();
                artifacts.insert(
                    id.clone(),
                    Record {
                        artifact_type: request.artifact_type.clone(),
                        digest: request.digest.clone(),
                        commit_hash,
                        manifest_url: request.manifest_url.clone(),
                        source: CollectionMembership {
                            entity: request.collection.entity.clone(),
                            project: request.collection.project.clone(),
                            collection: request.collection.name.clone(),
                            version_index,
                        },
                        description: request.description.clone(),
                        metadata: request.metadata.clone(),
                        file_count: request.file_count,
                        size: request.size,
                        deleted: false,
                        created_at: now,
                        updated_at: now,
                        logged_by: request.run.clone(),
                        used_by: Vec::new(),
                    },
                );
                info!(id = %id, collection = %request.collection, version = version_index, "artifact version created");
                id
            }
        };

        state.assign_aliases(&id, &request.collection, &request.aliases)?;
        state.attrs(&id)
    }

    fn fetch_by_id(&self, id: &ArtifactId) -> ApiResult<ArtifactAttrs> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .attrs(id)
    }

    fn fetch_by_name(&self, collection: &CollectionPath, alias: &str) -> ApiResult<ArtifactAttrs> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let missing = || ApiError::NotFound(format!("{collection}:{alias}"));
        let coll = state.collections.get(collection).ok_or_else(missing)?;
        let id = if is_version_alias(alias) {
            let index: usize = alias[1..].parse().map_err(|_| missing())?;
            coll.versions.get(index).ok_or_else(missing)?
        } else {
            coll.aliases.get(alias).ok_or_else(missing)?
        };
        let mut attrs = state.attrs(id).map_err(|_| missing())?;
        if attrs.source.collection_path() != *collection {
            let version_index = coll.versions.iter().position(|v| v == id).unwrap_or_default();
            attrs.membership = Some(CollectionMembership {
                entity: collection.entity.clone(),
                project: collection.project.clone(),
                collection: collection.name.clone(),
                version_index: version_index as u64,
            });
        }
        Ok(attrs)
    }

    fn add_aliases(
        &self,
        id: &ArtifactId,
        collection: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.live(id)?;
        state.assign_aliases(id, collection, aliases)
    }

    fn delete_aliases(
        &self,
        id: &ArtifactId,
        collection: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.live(id)?;
        if let Some(coll) = state.collections.get_mut(collection) {
            for alias in aliases {
                if coll.aliases.get(alias) == Some(id) {
                    coll.aliases.remove(alias);
                }
            }
        }
        Ok(())
    }

    fn update_fields(
        &self,
        id: &ArtifactId,
        description: Option<&str>,
        metadata: &Map<String, Value>,
    ) -> ApiResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let record = state.live_mut(id)?;
        record.description = description.map(str::to_string);
        record.metadata = metadata.clone();
        record.updated_at = Utc::now();
        Ok(())
    }

    fn link(
        &self,
        id: &ArtifactId,
        portfolio: &CollectionPath,
        aliases: &[String],
    ) -> ApiResult<u64> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.live(id)?.source.collection_path() == *portfolio {
            return Err(ApiError::InvalidRequest(format!(
                "{portfolio} is the artifact's own collection"
            )));
        }
        let coll = state.collections.entry(portfolio.clone()).or_default();
        let index = match coll.versions.iter().position(|v| v == id) {
            Some(index) => index,
            None => {
                coll.versions.push(id.clone());
                coll.versions.len() - 1
            }
        };
        state.assign_aliases(id, portfolio, aliases)?;
        debug!(id = %id, portfolio = %portfolio, version = index, "artifact linked");
        Ok(index as u64)
    }

    fn delete(&self, id: &ArtifactId, delete_aliases: bool) -> ApiResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.live(id)?;
        if state.holds_aliases(id) {
            if !delete_aliases {
                return Err(ApiError::Conflict(format!(
                    "artifact {id} still has aliases; delete them first"
                )));
            }
            for coll in state.collections.values_mut() {
                coll.aliases.retain(|_, holder| *holder != *id);
            }
        }
        state.live_mut(id)?.deleted = true;
        info!(id = %id, "artifact deleted");
        Ok(())
    }

    fn used_by(&self, id: &ArtifactId) -> ApiResult<Vec<RunRef>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.live(id)?.used_by.clone())
    }

    fn logged_by(&self, id: &ArtifactId) -> ApiResult<Option<RunRef>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.live(id)?.logged_by.clone())
    }
}

impl std::fmt::Debug for InMemoryMetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetadataService")
            .field("artifacts", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, digest: &str, aliases: &[&str]) -> CreateArtifact {
        CreateArtifact {
            client_id: ClientId::generate(),
            collection: CollectionPath::new("acme", "vision", name),
            artifact_type: "dataset".into(),
            digest: digest.into(),
            manifest_url: format!("memory://manifests/{digest}"),
            description: None,
            metadata: Map::new(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            file_count: 1,
            size: 10,
            run: Some(RunRef {
                entity: "acme".into(),
                project: "vision".into(),
                name: "run-1".into(),
            }),
        }
    }

    fn path(name: &str) -> CollectionPath {
        CollectionPath::new("acme", "vision", name)
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    #[test]
    fn versions_are_sequential() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "d0", &["latest"])).unwrap();
        let v1 = svc.create_or_fetch_artifact(&request("ds", "d1", &["latest"])).unwrap();
        assert_eq!(v0.source.version_index, 0);
        assert_eq!(v1.source.version_index, 1);
        assert_eq!(v1.source.qualified_name(), "acme/vision/ds:v1");
        assert_eq!(v0.commit_hash.len(), 12);
        assert_ne!(v0.id, v1.id);
    }

    #[test]
    fn same_digest_returns_existing_version() {
        let svc = InMemoryMetadataService::new();
        let first = svc.create_or_fetch_artifact(&request("ds", "same", &[])).unwrap();
        let again = svc
            .create_or_fetch_artifact(&request("ds", "same", &["best"]))
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.source.version_index, 0);
        assert_eq!(again.aliases, vec!["best".to_string()]);
        assert_eq!(svc.len(), 1);
    }

    #[test]
    fn only_latest_version_absorbs_identical_digest() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &["latest"])).unwrap();
        let v1 = svc.create_or_fetch_artifact(&request("ds", "b", &["latest"])).unwrap();
        let v2 = svc.create_or_fetch_artifact(&request("ds", "a", &["latest"])).unwrap();
        assert_eq!(v1.source.version_index, 1);
        assert_eq!(v2.source.version_index, 2);
        assert_ne!(v2.id, v0.id);
        assert_eq!(svc.fetch_by_name(&path("ds"), "latest").unwrap().id, v2.id);
        assert_eq!(svc.len(), 3);
    }

    #[test]
    fn alias_moves_to_newest_holder() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &["latest"])).unwrap();
        let v1 = svc.create_or_fetch_artifact(&request("ds", "b", &["latest"])).unwrap();
        assert!(svc.fetch_by_id(&v0.id).unwrap().aliases.is_empty());
        assert_eq!(svc.fetch_by_name(&path("ds"), "latest").unwrap().id, v1.id);
        assert_eq!(svc.fetch_by_name(&path("ds"), "v0").unwrap().id, v0.id);
        assert!(matches!(
            svc.fetch_by_name(&path("ds"), "v7"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn type_mismatch_in_collection_conflicts() {
        let svc = InMemoryMetadataService::new();
        svc.create_or_fetch_artifact(&request("ds", "a", &[])).unwrap();
        let mut other = request("ds", "b", &[]);
        other.artifact_type = "model".into();
        assert!(matches!(
            svc.create_or_fetch_artifact(&other),
            Err(ApiError::Conflict(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Aliases, fields, links
    // -----------------------------------------------------------------------

    #[test]
    fn alias_add_and_delete() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &[])).unwrap();
        svc.add_aliases(&v0.id, &path("ds"), &["prod".into(), "stable".into()])
            .unwrap();
        svc.delete_aliases(&v0.id, &path("ds"), &["prod".into()]).unwrap();
        assert_eq!(svc.fetch_by_id(&v0.id).unwrap().aliases, vec!["stable".to_string()]);
        assert!(svc
            .add_aliases(&v0.id, &path("ds"), &["v3".into()])
            .is_err());
    }

    #[test]
    fn update_fields_replaces_wholesale() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &[])).unwrap();
        let mut metadata = Map::new();
        metadata.insert("rows".into(), Value::from(12));
        svc.update_fields(&v0.id, Some("desc"), &metadata).unwrap();
        let attrs = svc.fetch_by_id(&v0.id).unwrap();
        assert_eq!(attrs.description.as_deref(), Some("desc"));
        assert_eq!(attrs.metadata, metadata);
        assert!(attrs.updated_at >= attrs.created_at);
    }

    #[test]
    fn link_into_portfolio() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &[])).unwrap();
        let portfolio = path("registry");
        assert_eq!(svc.link(&v0.id, &portfolio, &["prod".into()]).unwrap(), 0);
        assert_eq!(svc.link(&v0.id, &portfolio, &[]).unwrap(), 0);
        let via_portfolio = svc.fetch_by_name(&portfolio, "prod").unwrap();
        assert_eq!(via_portfolio.id, v0.id);
        assert_eq!(
            via_portfolio.membership.unwrap().qualified_name(),
            "acme/vision/registry:v0"
        );
        assert!(svc.fetch_by_name(&path("ds"), "v0").unwrap().membership.is_none());
        assert!(svc.link(&v0.id, &path("ds"), &[]).is_err());
    }

    // -----------------------------------------------------------------------
    // Delete and lineage
    // -----------------------------------------------------------------------

    #[test]
    fn delete_is_guarded_by_aliases() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &["latest"])).unwrap();
        assert!(matches!(svc.delete(&v0.id, false), Err(ApiError::Conflict(_))));
        svc.delete(&v0.id, true).unwrap();
        assert!(matches!(svc.fetch_by_id(&v0.id), Err(ApiError::NotFound(_))));
        assert!(svc.fetch_by_name(&path("ds"), "latest").is_err());

        // Version numbers are not reused.
        let v1 = svc.create_or_fetch_artifact(&request("ds", "b", &[])).unwrap();
        assert_eq!(v1.source.version_index, 1);
    }

    #[test]
    fn lineage() {
        let svc = InMemoryMetadataService::new();
        let v0 = svc.create_or_fetch_artifact(&request("ds", "a", &[])).unwrap();
        assert_eq!(svc.logged_by(&v0.id).unwrap().unwrap().name, "run-1");
        assert!(svc.used_by(&v0.id).unwrap().is_empty());
        svc.record_use(
            &v0.id,
            RunRef {
                entity: "acme".into(),
                project: "vision".into(),
                name: "eval".into(),
            },
        )
        .unwrap();
        assert_eq!(svc.used_by(&v0.id).unwrap().len(), 1);
    }
}
