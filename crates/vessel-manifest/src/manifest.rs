use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use vessel_crypto::ContentHasher;

use crate::entry::ManifestEntry;
use crate::error::{ManifestError, ManifestResult};
use crate::path::LogicalPath;

/// Manifest document format version written by this build.
pub const MANIFEST_VERSION: u32 = 1;

/// Storage policy recorded in manifests produced by this build.
pub const DEFAULT_STORAGE_POLICY: &str = "vessel-storage-policy-v1";

/// Serialized form of a [`Manifest`].
///
/// ```text
/// {"version": 1, "storagePolicy": "...", "entries": [{"path", "digest", "size", "ref"?, "extra"?}]}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub version: u32,
    pub storage_policy: String,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Path-keyed, insertion-ordered set of manifest entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    storage_policy: String,
    entries: IndexMap<LogicalPath, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// Create an empty manifest using the default storage policy.
    pub fn new() -> Self {
        Self {
            storage_policy: DEFAULT_STORAGE_POLICY.to_string(),
            entries: IndexMap::new(),
        }
    }

    pub fn storage_policy(&self) -> &str {
        &self.storage_policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by logical path (normalized before lookup).
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        let key = LogicalPath::new(path).ok()?;
        self.entries.get(&key)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    /// Mutable access to entries (paths and digests are not meant to change).
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut ManifestEntry> {
        self.entries.values_mut()
    }

    pub fn paths(&self) -> impl Iterator<Item = &LogicalPath> {
        self.entries.keys()
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Add an entry.
    ///
    /// Re-adding an entry with the same digest is a no-op that returns the
    /// entry already present. An entry with a different digest at an existing
    /// path is rejected.
    pub fn add_entry(&mut self, entry: ManifestEntry) -> ManifestResult<ManifestEntry> {
        if let Some(existing) = self.entries.get(&entry.path) {
            if existing.digest != entry.digest {
                return Err(ManifestError::DigestConflict {
                    path: entry.path.to_string(),
                    existing: existing.digest.clone(),
                    incoming: entry.digest,
                });
            }
            return Ok(existing.clone());
        }
        self.entries.insert(entry.path.clone(), entry.clone());
        Ok(entry)
    }

    /// Insert an entry, replacing whatever was at its path.
    pub fn insert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        self.entries.insert(entry.path.clone(), entry)
    }

    // ---------------------------------------------------------------
    // Digests
    // ---------------------------------------------------------------

    /// Aggregate digest of the manifest contents.
    ///
    /// Hashes the `(path, digest, size)` triples in path order, so two
    /// manifests with the same contents always agree regardless of the order
    /// entries were added in.
    pub fn digest(&self) -> String {
        let mut sorted: Vec<&ManifestEntry> = self.entries.values().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = ContentHasher::MANIFEST.start();
        for entry in sorted {
            hasher.update(entry.path.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(entry.digest.as_bytes());
            hasher.update(&[0]);
            if let Some(size) = entry.size {
                hasher.update(size.to_string().as_bytes());
            }
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Sum of all known entry sizes in bytes.
    pub fn size(&self) -> u64 {
        self.entries.values().filter_map(|e| e.size).sum()
    }

    // ---------------------------------------------------------------
    // Serialization
    // ---------------------------------------------------------------

    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument {
            version: MANIFEST_VERSION,
            storage_policy: self.storage_policy.clone(),
            entries: self.entries.values().cloned().collect(),
        }
    }

    /// Build a manifest from a document. Later entries win on duplicate paths.
    pub fn from_document(doc: ManifestDocument) -> ManifestResult<Self> {
        if doc.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(doc.version));
        }
        let mut manifest = Self {
            storage_policy: doc.storage_policy,
            entries: IndexMap::with_capacity(doc.entries.len()),
        };
        for entry in doc.entries {
            manifest.insert(entry);
        }
        Ok(manifest)
    }

    pub fn to_json_bytes(&self) -> ManifestResult<Vec<u8>> {
        serde_json::to_vec(&self.to_document())
            .map_err(|e| ManifestError::Serialization(e.to_string()))
    }

    /// Parse a serialized manifest document.
    ///
    /// The version field is checked before the rest of the document so that
    /// documents from newer formats fail with
    /// [`ManifestError::UnsupportedVersion`] rather than a shape mismatch.
    pub fn from_json_slice(data: &[u8]) -> ManifestResult<Self> {
        let probe: VersionProbe =
            serde_json::from_slice(data).map_err(|e| ManifestError::Serialization(e.to_string()))?;
        if probe.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(probe.version));
        }
        let doc: ManifestDocument =
            serde_json::from_slice(data).map_err(|e| ManifestError::Serialization(e.to_string()))?;
        Self::from_document(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(path: &str, digest: &str, size: u64) -> ManifestEntry {
        ManifestEntry::new(LogicalPath::new(path).unwrap(), digest, size)
    }

    // -----------------------------------------------------------------------
    // add_entry
    // -----------------------------------------------------------------------

    #[test]
    fn add_and_get() {
        let mut m = Manifest::new();
        m.add_entry(entry("a/b.txt", "d1", 3)).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a/b.txt").unwrap().digest, "d1");
        assert_eq!(m.get("/a//b.txt").unwrap().digest, "d1");
        assert!(m.get("missing").is_none());
    }

    #[test]
    fn identical_readd_is_noop() {
        let mut m = Manifest::new();
        let first = m.add_entry(entry("a", "d1", 1)).unwrap();
        let second = m.add_entry(entry("a", "d1", 1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn conflicting_digest_is_rejected() {
        let mut m = Manifest::new();
        m.add_entry(entry("a", "d1", 1)).unwrap();
        let err = m.add_entry(entry("a", "d2", 1)).unwrap_err();
        assert!(matches!(err, ManifestError::DigestConflict { .. }));
        assert_eq!(m.get("a").unwrap().digest, "d1");
    }

    #[test]
    fn insert_overwrites() {
        let mut m = Manifest::new();
        m.insert(entry("a", "d1", 1));
        let old = m.insert(entry("a", "d2", 2)).unwrap();
        assert_eq!(old.digest, "d1");
        assert_eq!(m.get("a").unwrap().digest, "d2");
    }

    #[test]
    fn preserves_insertion_order() {
        let mut m = Manifest::new();
        for p in ["z", "a", "m"] {
            m.add_entry(entry(p, p, 1)).unwrap();
        }
        let order: Vec<&str> = m.paths().map(|p| p.as_str()).collect();
        assert_eq!(order, vec!["z", "a", "m"]);
    }

    // -----------------------------------------------------------------------
    // Digest
    // -----------------------------------------------------------------------

    #[test]
    fn digest_ignores_insertion_order() {
        let mut m1 = Manifest::new();
        let mut m2 = Manifest::new();
        m1.add_entry(entry("a", "1", 1)).unwrap();
        m1.add_entry(entry("b", "2", 2)).unwrap();
        m2.add_entry(entry("b", "2", 2)).unwrap();
        m2.add_entry(entry("a", "1", 1)).unwrap();
        assert_eq!(m1.digest(), m2.digest());
    }

    #[test]
    fn digest_changes_with_content() {
        let mut m1 = Manifest::new();
        let mut m2 = Manifest::new();
        m1.add_entry(entry("a", "1", 1)).unwrap();
        m2.add_entry(entry("a", "2", 1)).unwrap();
        assert_ne!(m1.digest(), m2.digest());

        let mut m3 = Manifest::new();
        m3.add_entry(entry("a", "1", 5)).unwrap();
        assert_ne!(m1.digest(), m3.digest());
    }

    #[test]
    fn empty_manifest_digest_is_stable() {
        assert_eq!(Manifest::new().digest(), Manifest::new().digest());
        assert_eq!(Manifest::new().digest().len(), 64);
    }

    #[test]
    fn size_sums_known_sizes() {
        let mut m = Manifest::new();
        m.add_entry(entry("a", "1", 10)).unwrap();
        m.add_entry(ManifestEntry::reference(
            LogicalPath::new("r").unwrap(),
            "http://h/r",
            "etag",
            None,
        ))
        .unwrap();
        m.add_entry(entry("b", "2", 5)).unwrap();
        assert_eq!(m.size(), 15);
    }

    proptest! {
        #[test]
        fn digest_is_order_independent(
            items in proptest::collection::btree_map("[a-z]{1,8}(/[a-z]{1,8}){0,2}", (any::<u32>(), any::<u64>()), 0..16),
            seed in any::<u64>(),
        ) {
            let entries: Vec<ManifestEntry> = items
                .iter()
                .map(|(p, (d, s))| entry(p, &d.to_string(), *s))
                .collect();
            let mut shuffled = entries.clone();
            // Deterministic rotation + reversal driven by the seed.
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
                if seed % 2 == 0 {
                    shuffled.reverse();
                }
            }
            let mut m1 = Manifest::new();
            let mut m2 = Manifest::new();
            for e in entries {
                m1.add_entry(e).unwrap();
            }
            for e in shuffled {
                m2.add_entry(e).unwrap();
            }
            prop_assert_eq!(m1.digest(), m2.digest());
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    #[test]
    fn document_roundtrip() {
        let mut m = Manifest::new();
        m.add_entry(entry("data/x.csv", "d1", 10)).unwrap();
        m.add_entry(
            ManifestEntry::reference(
                LogicalPath::new("remote").unwrap(),
                "https://example.com/remote",
                "\"etag\"",
                Some(7),
            )
            .with_extra("etag", "etag"),
        )
        .unwrap();
        let bytes = m.to_json_bytes().unwrap();
        let back = Manifest::from_json_slice(&bytes).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.digest(), m.digest());
    }

    #[test]
    fn document_uses_versioned_schema() {
        let m = Manifest::new();
        let json: serde_json::Value = serde_json::from_slice(&m.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["storagePolicy"], DEFAULT_STORAGE_POLICY);
        assert!(json["entries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let data = br#"{"version": 2, "contents": {"a": {}}}"#;
        assert_eq!(
            Manifest::from_json_slice(data).unwrap_err(),
            ManifestError::UnsupportedVersion(2)
        );
    }

    #[test]
    fn duplicate_paths_in_document_last_write_wins() {
        let data = br#"{"version": 1, "storagePolicy": "p", "entries": [
            {"path": "a", "digest": "old", "size": 1},
            {"path": "/a", "digest": "new", "size": 2}
        ]}"#;
        let m = Manifest::from_json_slice(data).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a").unwrap().digest, "new");
        assert_eq!(m.storage_policy(), "p");
    }

    #[test]
    fn malformed_document() {
        assert!(matches!(
            Manifest::from_json_slice(b"not json"),
            Err(ManifestError::Serialization(_))
        ));
    }
}
