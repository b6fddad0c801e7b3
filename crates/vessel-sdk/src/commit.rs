//! Committing artifacts and managing them afterwards.
//!
//! `save` snapshots the manifest, marks the artifact final and hands the
//! upload to a background thread; `wait` collects the result and applies the
//! identity the metadata service assigned.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use vessel_manifest::ManifestEntry;
use vessel_types::{validate_aliases, ArtifactState, CollectionMembership, CollectionPath, RunRef};

use crate::artifact::{Artifact, ArtifactCell, ArtifactInner, CommitOutcome, ServerIdentity};
use crate::error::{ArtifactError, ArtifactResult};
use crate::metadata::{ArtifactAttrs, CreateArtifact};

impl Artifact {
    /// Start committing a draft, or push edits of a committed artifact.
    ///
    /// For a draft this finalizes the manifest and returns while staged
    /// files upload in the background; call [`wait`](Artifact::wait) for the
    /// outcome. Saving a draft that is already being committed does nothing.
    /// For a committed artifact this is [`update`](Artifact::update).
    pub fn save(&self) -> ArtifactResult<()> {
        let mut pending = self.cell.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.write();
        match inner.state {
            ArtifactState::Committed => {
                drop(inner);
                drop(pending);
                return self.update();
            }
            ArtifactState::Deleted => {
                return Err(ArtifactError::InvalidState(
                    "a deleted artifact cannot be saved".into(),
                ))
            }
            ArtifactState::Draft if pending.is_some() => return Ok(()),
            ArtifactState::Draft => {}
        }
        validate_aliases(inner.aliases.iter().map(String::as_str))?;

        let staged: Vec<ManifestEntry> = inner
            .manifest
            .entries()
            .filter(|e| e.local_path.is_some())
            .cloned()
            .collect();
        let document = inner.manifest.to_json_bytes()?;
        let request = CreateArtifact {
            client_id: inner.client_id,
            collection: inner.collection_path(),
            artifact_type: inner.artifact_type.clone(),
            digest: inner.manifest.digest(),
            manifest_url: String::new(),
            description: inner.description.clone(),
            metadata: inner.metadata.clone(),
            aliases: inner.aliases.iter().cloned().collect(),
            file_count: inner.manifest.len() as u64,
            size: inner.manifest.size(),
            run: inner.run.clone(),
        };

        let (tx, rx) = mpsc::channel();
        let session = self.session.clone();
        let spawned = thread::Builder::new()
            .name(format!("vessel-commit-{}", inner.client_id.short_id()))
            .spawn(move || {
                let outcome = session.run_commit(&staged, &document, request);
                // The receiver may have been dropped along with the artifact.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return Err(ArtifactError::Internal(format!(
                "failed to start commit thread: {e}"
            )));
        }

        inner.finalized = true;
        *pending = Some(rx);
        debug!(client_id = %inner.client_id, name = %inner.name, "commit started");
        Ok(())
    }

    /// Block until the background commit started by `save` finishes.
    ///
    /// With `Some(timeout)` gives up with [`ArtifactError::WaitTimeout`] when
    /// it expires; the commit keeps running and `wait` may be called again.
    /// If the commit failed the artifact becomes editable again.
    pub fn wait(&self, timeout: Option<Duration>) -> ArtifactResult<()> {
        let mut pending = self.cell.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = pending.as_ref() else {
            return match self.read().state {
                ArtifactState::Draft => Err(ArtifactError::InvalidState(
                    "artifact has not been saved".into(),
                )),
                _ => Ok(()),
            };
        };

        let received = match timeout {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(timeout) => rx.recv_timeout(timeout),
        };
        let outcome: CommitOutcome = match received {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => return Err(ArtifactError::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(ArtifactError::Internal(
                "commit thread exited without reporting".into(),
            )),
        };
        *pending = None;

        match outcome {
            Ok(attrs) => {
                self.apply_commit(&attrs);
                Ok(())
            }
            Err(e) => {
                self.write().finalized = false;
                warn!(error = %e, "artifact commit failed");
                Err(e)
            }
        }
    }

    /// `save` followed by `wait(None)`.
    pub fn commit(&self) -> ArtifactResult<()> {
        self.save()?;
        self.wait(None)
    }

    fn apply_commit(&self, attrs: &ArtifactAttrs) {
        let client_id = {
            let mut inner = self.write();
            debug_assert!(inner.state.can_transition_to(ArtifactState::Committed));
            inner.state = ArtifactState::Committed;
            inner.identity = Some(ServerIdentity::from(attrs));
            inner.aliases = attrs.aliases.iter().cloned().collect();
            inner.saved_aliases = inner.aliases.clone();
            inner.description = attrs.description.clone();
            inner.metadata = attrs.metadata.clone();

            let policy = self.session.policy();
            for entry in inner.manifest.entries_mut() {
                if entry.local_path.is_none() {
                    continue;
                }
                match policy.adopt_staged(entry) {
                    Ok(_) => entry.local_path = None,
                    Err(e) => warn!(path = %entry.path, error = %e, "staged copy not moved to cache"),
                }
            }
            inner.client_id
        };

        self.session
            .cache()
            .promote(&client_id, attrs.id.clone(), Arc::clone(&self.cell));
        info!(
            id = %attrs.id,
            name = %attrs.source.qualified_name(),
            digest = %attrs.digest,
            files = attrs.file_count,
            "artifact committed"
        );
    }

    // ---- Committed artifacts ----

    /// Push alias changes, description and metadata of a committed
    /// artifact to the metadata service.
    pub fn update(&self) -> ArtifactResult<()> {
        let (id, collection, added, removed, description, metadata) = {
            let inner = self.read();
            let identity = inner.ensure_live("update")?;
            let added: Vec<String> = inner
                .aliases
                .difference(&inner.saved_aliases)
                .cloned()
                .collect();
            let removed: Vec<String> = inner
                .saved_aliases
                .difference(&inner.aliases)
                .cloned()
                .collect();
            (
                identity.id.clone(),
                identity.source.collection_path(),
                added,
                removed,
                inner.description.clone(),
                inner.metadata.clone(),
            )
        };
        validate_aliases(added.iter().map(String::as_str))?;

        let client = self.session.client();
        if !added.is_empty() {
            client.add_aliases(&id, &collection, &added)?;
        }
        if !removed.is_empty() {
            client.delete_aliases(&id, &collection, &removed)?;
        }
        client.update_fields(&id, description.as_deref(), &metadata)?;
        let attrs = client.fetch_by_id(&id)?;

        let mut inner = self.write();
        inner.aliases = attrs.aliases.iter().cloned().collect();
        inner.saved_aliases = inner.aliases.clone();
        if let Some(identity) = inner.identity.as_mut() {
            identity.updated_at = attrs.updated_at;
        }
        debug!(id = %id, added = added.len(), removed = removed.len(), "artifact updated");
        Ok(())
    }

    /// Delete a committed artifact.
    ///
    /// Fails while the artifact still holds aliases unless `delete_aliases`
    /// is set.
    pub fn delete(&self, delete_aliases: bool) -> ArtifactResult<()> {
        let id = self.read().ensure_live("delete")?.id.clone();
        self.session.client().delete(&id, delete_aliases)?;
        {
            let mut inner = self.write();
            inner.state = ArtifactState::Deleted;
            inner.aliases.clear();
            inner.saved_aliases.clear();
        }
        self.session.cache().remove_committed(&id);
        info!(id = %id, "artifact deleted");
        Ok(())
    }

    /// Link this artifact into the portfolio at `target` (`name`,
    /// `project/name` or `entity/project/name`).
    pub fn link(&self, target: &str, aliases: &[&str]) -> ArtifactResult<CollectionMembership> {
        validate_aliases(aliases.iter().copied())?;
        let (id, entity, project) = {
            let inner = self.read();
            let identity = inner.ensure_live("link")?;
            (
                identity.id.clone(),
                identity.source.entity.clone(),
                identity.source.project.clone(),
            )
        };
        let portfolio = CollectionPath::parse(target, &entity, &project)?;
        let aliases: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
        let version_index = self.session.client().link(&id, &portfolio, &aliases)?;
        info!(id = %id, portfolio = %portfolio, version = version_index, "artifact linked");
        Ok(CollectionMembership {
            entity: portfolio.entity,
            project: portfolio.project,
            collection: portfolio.name,
            version_index,
        })
    }

    /// Runs that consumed this artifact.
    pub fn used_by(&self) -> ArtifactResult<Vec<RunRef>> {
        let id = self.read().ensure_live("used_by")?.id.clone();
        Ok(self.session.client().used_by(&id)?)
    }

    /// The run that produced this artifact, if the service knows it.
    pub fn logged_by(&self) -> ArtifactResult<Option<RunRef>> {
        let id = self.read().ensure_live("logged_by")?.id.clone();
        Ok(self.session.client().logged_by(&id)?)
    }

    /// A new draft in the same collection starting from this artifact's
    /// manifest, description and metadata.
    pub fn new_draft(&self) -> ArtifactResult<Artifact> {
        let inner = self.read();
        inner.ensure_live("new_draft")?;
        let mut draft = ArtifactInner::draft(
            inner.name.clone(),
            inner.artifact_type.clone(),
            inner.entity.clone(),
            inner.project.clone(),
        );
        draft.description = inner.description.clone();
        draft.metadata = inner.metadata.clone();
        draft.dependents = inner.dependents.clone();
        for entry in inner.manifest.entries() {
            let mut entry = entry.clone();
            entry.local_path = None;
            draft.manifest.insert(entry);
        }
        drop(inner);

        let cell = Arc::new(ArtifactCell::new(draft));
        Ok(self.session.register_draft(cell))
    }
}
