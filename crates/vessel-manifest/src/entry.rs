use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::LogicalPath;

/// One addressable unit of an artifact.
///
/// Plain files carry a base64 MD5 `digest` and a `size`. Reference entries
/// additionally carry the URI their content lives at in `reference`; their
/// digest is whatever the owning storage handler considers stable for that
/// URI (an ETag, an object generation, the digest of a cross-artifact target).
///
/// `local_path` points at the engine-owned staging copy of a file that has
/// been added but not yet uploaded. It is never serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: LogicalPath,
    pub digest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    #[serde(skip)]
    pub local_path: Option<PathBuf>,
}

impl ManifestEntry {
    /// A plain (uploaded) file entry.
    pub fn new(path: LogicalPath, digest: impl Into<String>, size: u64) -> Self {
        Self {
            path,
            digest: digest.into(),
            size: Some(size),
            reference: None,
            extra: BTreeMap::new(),
            local_path: None,
        }
    }

    /// A reference entry pointing at external content.
    pub fn reference(
        path: LogicalPath,
        uri: impl Into<String>,
        digest: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        Self {
            path,
            digest: digest.into(),
            size,
            reference: Some(uri.into()),
            extra: BTreeMap::new(),
            local_path: None,
        }
    }

    pub fn with_local_path(mut self, local_path: PathBuf) -> Self {
        self.local_path = Some(local_path);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if the content lives outside engine-managed storage.
    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Scheme of the reference URI, if this is a reference entry.
    pub fn reference_scheme(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .and_then(|uri| uri.split_once("://").map(|(scheme, _)| scheme))
    }

    /// Same content as `other` (path, digest, size, and reference).
    pub fn same_content(&self, other: &ManifestEntry) -> bool {
        self.path == other.path
            && self.digest == other.digest
            && self.size == other.size
            && self.reference == other.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> LogicalPath {
        LogicalPath::new(p).unwrap()
    }

    #[test]
    fn plain_entry_serialization_omits_optional_fields() {
        let entry = ManifestEntry::new(path("a.txt"), "abc==", 3)
            .with_local_path(PathBuf::from("/staging/x"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"path": "a.txt", "digest": "abc==", "size": 3})
        );
    }

    #[test]
    fn reference_entry_roundtrip() {
        let entry = ManifestEntry::reference(
            path("remote/data.bin"),
            "s3://bucket/data.bin",
            "etag-1",
            Some(42),
        )
        .with_extra("versionID", "v-17");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ref\":\"s3://bucket/data.bin\""));
        let back: ManifestEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
        assert!(back.is_reference());
        assert_eq!(back.reference_scheme(), Some("s3"));
    }

    #[test]
    fn local_path_is_not_serialized() {
        let entry = ManifestEntry::new(path("a"), "d", 1).with_local_path("/tmp/a".into());
        let back: ManifestEntry =
            serde_json::from_str(&serde_json::to_string(&entry).unwrap()).unwrap();
        assert!(back.local_path.is_none());
        assert!(back.same_content(&entry));
    }

    #[test]
    fn size_may_be_null() {
        let back: ManifestEntry =
            serde_json::from_str(r#"{"path":"x","digest":"d","size":null,"ref":"http://h/x"}"#)
                .unwrap();
        assert_eq!(back.size, None);
        assert_eq!(back.reference_scheme(), Some("http"));
    }
}
