use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::debug;
use vessel_manifest::{LogicalPath, ManifestEntry};

use crate::error::{StoreError, StoreResult};
use crate::handler::{ArtifactResolver, StorageHandler};
use crate::uri::{artifact_ref_uri, parse_artifact_ref, ARTIFACT_SCHEME};

/// Handler for `vessel-artifact://` references into other artifacts.
///
/// Chains of cross-artifact references are flattened at store time: the
/// stored entry always names the artifact that holds the concrete content.
pub struct ArtifactRefHandler {
    resolver: Weak<dyn ArtifactResolver>,
}

impl ArtifactRefHandler {
    pub fn new(resolver: Weak<dyn ArtifactResolver>) -> Self {
        Self { resolver }
    }

    fn resolver(&self) -> StoreResult<Arc<dyn ArtifactResolver>> {
        self.resolver.upgrade().ok_or(StoreError::ResolverUnavailable)
    }
}

impl StorageHandler for ArtifactRefHandler {
    fn name(&self) -> &'static str {
        "artifact"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        scheme == ARTIFACT_SCHEME
    }

    fn store_reference(
        &self,
        uri: &str,
        name: Option<&LogicalPath>,
        _checksum: bool,
        _max_objects: Option<usize>,
    ) -> StoreResult<Vec<ManifestEntry>> {
        let resolver = self.resolver()?;
        let (mut id, mut path) = parse_artifact_ref(uri)?;
        let mut seen = HashSet::new();

        let target = loop {
            if !seen.insert((id.clone(), path.clone())) {
                return Err(StoreError::invalid(uri, "reference cycle"));
            }
            let entry = resolver.resolve_entry(&id, &path)?;
            let next = entry
                .reference
                .as_deref()
                .filter(|_| entry.reference_scheme() == Some(ARTIFACT_SCHEME))
                .map(parse_artifact_ref)
                .transpose()?;
            match next {
                Some(hop) => (id, path) = hop,
                None => break entry,
            }
        };

        let logical = match name {
            Some(name) => name.clone(),
            None => LogicalPath::new(path.file_name())?,
        };
        debug!(uri, target_artifact = %id, target_path = %path, hops = seen.len(), "resolved artifact reference");
        Ok(vec![ManifestEntry::reference(
            logical,
            artifact_ref_uri(&id, &path),
            target.digest,
            Some(0),
        )])
    }

    fn load_path(&self, entry: &ManifestEntry) -> StoreResult<PathBuf> {
        let uri = entry
            .reference
            .as_deref()
            .ok_or_else(|| StoreError::invalid(entry.path.as_str(), "not a reference entry"))?;
        let (id, path) = parse_artifact_ref(uri)?;
        self.resolver()?.materialize(&id, &path)
    }
}

impl std::fmt::Debug for ArtifactRefHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRefHandler")
            .field("resolver_alive", &(self.resolver.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vessel_types::ArtifactId;

    struct FakeResolver {
        entries: HashMap<(ArtifactId, LogicalPath), ManifestEntry>,
    }

    impl ArtifactResolver for FakeResolver {
        fn resolve_entry(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<ManifestEntry> {
            self.entries
                .get(&(id.clone(), path.clone()))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("{id}/{path}")))
        }

        fn materialize(&self, id: &ArtifactId, path: &LogicalPath) -> StoreResult<PathBuf> {
            self.resolve_entry(id, path)?;
            Ok(PathBuf::from(format!("/materialized/{id}/{path}")))
        }
    }

    fn lp(p: &str) -> LogicalPath {
        LogicalPath::new(p).unwrap()
    }

    fn chain() -> Arc<FakeResolver> {
        // a1:x.txt is concrete, a2:y.txt -> a1:x.txt, a3:z.txt -> a2:y.txt
        let a1 = ArtifactId::new("a1");
        let a2 = ArtifactId::new("a2");
        let a3 = ArtifactId::new("a3");
        let mut entries = HashMap::new();
        entries.insert(
            (a1.clone(), lp("x.txt")),
            ManifestEntry::new(lp("x.txt"), "concrete", 5),
        );
        entries.insert(
            (a2.clone(), lp("y.txt")),
            ManifestEntry::reference(lp("y.txt"), artifact_ref_uri(&a1, &lp("x.txt")), "concrete", Some(0)),
        );
        entries.insert(
            (a3.clone(), lp("z.txt")),
            ManifestEntry::reference(lp("z.txt"), artifact_ref_uri(&a2, &lp("y.txt")), "concrete", Some(0)),
        );
        Arc::new(FakeResolver { entries })
    }

    fn handler_for(resolver: &Arc<FakeResolver>) -> ArtifactRefHandler {
        let as_dyn: Arc<dyn ArtifactResolver> = Arc::clone(resolver) as Arc<dyn ArtifactResolver>;
        ArtifactRefHandler::new(Arc::downgrade(&as_dyn))
    }

    #[test]
    fn chains_are_flattened() {
        let resolver = chain();
        let handler = handler_for(&resolver);
        let uri = artifact_ref_uri(&ArtifactId::new("a3"), &lp("z.txt"));

        let entries = handler.store_reference(&uri, Some(&lp("w.txt")), true, None).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.path.as_str(), "w.txt");
        assert_eq!(e.digest, "concrete");
        assert_eq!(e.size, Some(0));
        assert_eq!(
            e.reference.as_deref(),
            Some(artifact_ref_uri(&ArtifactId::new("a1"), &lp("x.txt")).as_str())
        );
    }

    #[test]
    fn default_name_is_target_file_name() {
        let resolver = chain();
        let handler = handler_for(&resolver);
        let uri = artifact_ref_uri(&ArtifactId::new("a1"), &lp("x.txt"));
        let entries = handler.store_reference(&uri, None, true, None).unwrap();
        assert_eq!(entries[0].path.as_str(), "x.txt");
    }

    #[test]
    fn cycles_are_rejected() {
        let a = ArtifactId::new("a");
        let b = ArtifactId::new("b");
        let mut entries = HashMap::new();
        entries.insert(
            (a.clone(), lp("p")),
            ManifestEntry::reference(lp("p"), artifact_ref_uri(&b, &lp("q")), "d", Some(0)),
        );
        entries.insert(
            (b.clone(), lp("q")),
            ManifestEntry::reference(lp("q"), artifact_ref_uri(&a, &lp("p")), "d", Some(0)),
        );
        let resolver = Arc::new(FakeResolver { entries });
        let handler = handler_for(&resolver);
        let err = handler
            .store_reference(&artifact_ref_uri(&a, &lp("p")), None, true, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference { .. }));
    }

    #[test]
    fn load_materializes_target() {
        let resolver = chain();
        let handler = handler_for(&resolver);
        let entry = handler
            .store_reference(&artifact_ref_uri(&ArtifactId::new("a2"), &lp("y.txt")), None, true, None)
            .unwrap()
            .remove(0);
        assert_eq!(
            handler.load_path(&entry).unwrap(),
            PathBuf::from("/materialized/a1/x.txt")
        );
    }

    #[test]
    fn dropped_resolver_is_reported() {
        let handler = {
            let resolver = chain();
            handler_for(&resolver)
        };
        let uri = artifact_ref_uri(&ArtifactId::new("a1"), &lp("x.txt"));
        assert!(matches!(
            handler.store_reference(&uri, None, true, None),
            Err(StoreError::ResolverUnavailable)
        ));
    }
}
