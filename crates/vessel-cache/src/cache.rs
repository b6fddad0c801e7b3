use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::debug;
use vessel_types::{ArtifactId, ClientId};

use crate::content::ContentCache;

/// Process-scoped registry of artifact objects plus the content cache.
///
/// `T` is the shared state of an artifact object. The registry does not know
/// anything about it beyond identity:
///
/// - drafts are tracked by [`ClientId`] through `Weak` handles, so dropping
///   the last handle to a draft forgets it;
/// - committed artifacts are tracked by [`ArtifactId`] through strong
///   handles, so two lookups of the same id return the same object. An
///   entry no caller holds any more is pruned on the next insert.
pub struct ArtifactsCache<T> {
    content: Arc<ContentCache>,
    drafts: RwLock<HashMap<ClientId, Weak<T>>>,
    committed: RwLock<HashMap<ArtifactId, Arc<T>>>,
}

impl<T> ArtifactsCache<T> {
    /// Create a registry whose content cache lives under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            content: Arc::new(ContentCache::new(root)),
            drafts: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
        }
    }

    /// The shared on-disk content cache.
    pub fn content(&self) -> &Arc<ContentCache> {
        &self.content
    }

    // -----------------------------------------------------------------------
    // Draft index
    // -----------------------------------------------------------------------

    pub fn register_draft(&self, id: ClientId, artifact: &Arc<T>) {
        let mut drafts = self.drafts.write().unwrap_or_else(PoisonError::into_inner);
        drafts.retain(|_, weak| weak.strong_count() > 0);
        drafts.insert(id, Arc::downgrade(artifact));
    }

    /// The live draft with this client id, if any.
    pub fn draft(&self, id: &ClientId) -> Option<Arc<T>> {
        let found = {
            let drafts = self.drafts.read().unwrap_or_else(PoisonError::into_inner);
            drafts.get(id).map(Weak::upgrade)
        };
        match found {
            Some(Some(artifact)) => Some(artifact),
            Some(None) => {
                self.remove_draft(id);
                None
            }
            None => None,
        }
    }

    pub fn remove_draft(&self, id: &ClientId) {
        self.drafts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Number of drafts still alive.
    pub fn draft_count(&self) -> usize {
        self.drafts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    // -----------------------------------------------------------------------
    // Committed index
    // -----------------------------------------------------------------------

    /// Register a committed artifact.
    ///
    /// The first object registered for an id wins; the returned handle is the
    /// one callers should use from now on.
    pub fn insert_committed(&self, id: ArtifactId, artifact: Arc<T>) -> Arc<T> {
        let mut committed = self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = committed.len();
        committed.retain(|key, held| *key == id || Arc::strong_count(held) > 1);
        if committed.len() < before {
            debug!(pruned = before - committed.len(), "unreferenced artifacts released");
        }
        Arc::clone(committed.entry(id).or_insert(artifact))
    }

    pub fn committed(&self, id: &ArtifactId) -> Option<Arc<T>> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove_committed(&self, id: &ArtifactId) -> Option<Arc<T>> {
        self.committed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Move a draft into the committed index under its server id.
    pub fn promote(&self, client_id: &ClientId, server_id: ArtifactId, artifact: Arc<T>) -> Arc<T> {
        self.remove_draft(client_id);
        debug!(client_id = %client_id, server_id = %server_id, "draft promoted");
        self.insert_committed(server_id, artifact)
    }

    pub fn committed_count(&self) -> usize {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> fmt::Debug for ArtifactsCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactsCache")
            .field("content", &self.content)
            .field("drafts", &self.draft_count())
            .field("committed", &self.committed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, ArtifactsCache<String>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactsCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[test]
    fn drafts_are_weak() {
        let (_dir, cache) = cache();
        let id = ClientId::generate();
        let draft = Arc::new("draft".to_string());
        cache.register_draft(id, &draft);
        assert_eq!(cache.draft(&id).as_deref(), Some(&"draft".to_string()));
        assert_eq!(cache.draft_count(), 1);

        drop(draft);
        assert!(cache.draft(&id).is_none());
        assert_eq!(cache.draft_count(), 0);
    }

    #[test]
    fn first_committed_registration_wins() {
        let (_dir, cache) = cache();
        let id = ArtifactId::new("a1");
        let first = cache.insert_committed(id.clone(), Arc::new("first".into()));
        let second = cache.insert_committed(id.clone(), Arc::new("second".into()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*cache.committed(&id).unwrap(), "first");
    }

    #[test]
    fn unreferenced_committed_entries_are_pruned() {
        let (_dir, cache) = cache();
        let kept = cache.insert_committed(ArtifactId::new("kept"), Arc::new("kept".into()));
        let dropped = cache.insert_committed(ArtifactId::new("gone"), Arc::new("gone".into()));
        drop(dropped);
        assert_eq!(cache.committed_count(), 2);

        let _fresh = cache.insert_committed(ArtifactId::new("new"), Arc::new("new".into()));
        assert!(cache.committed(&ArtifactId::new("gone")).is_none());
        assert!(Arc::ptr_eq(&cache.committed(&ArtifactId::new("kept")).unwrap(), &kept));
        assert_eq!(cache.committed_count(), 2);
    }

    #[test]
    fn promote_moves_draft_to_committed() {
        let (_dir, cache) = cache();
        let client = ClientId::generate();
        let obj = Arc::new("obj".to_string());
        cache.register_draft(client, &obj);

        let registered = cache.promote(&client, ArtifactId::new("s1"), Arc::clone(&obj));
        assert!(Arc::ptr_eq(&registered, &obj));
        assert!(cache.draft(&client).is_none());
        assert!(cache.committed(&ArtifactId::new("s1")).is_some());

        assert!(cache.remove_committed(&ArtifactId::new("s1")).is_some());
        assert_eq!(cache.committed_count(), 0);
    }

    #[test]
    fn content_cache_is_shared() {
        let (dir, cache) = cache();
        let content = Arc::clone(cache.content());
        assert!(Arc::ptr_eq(&content, cache.content()));
        assert_eq!(content.root(), dir.path().join("cache"));
    }
}
