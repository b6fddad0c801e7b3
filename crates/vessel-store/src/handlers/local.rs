use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vessel_crypto::md5_file_b64;
use vessel_manifest::{LogicalPath, ManifestEntry};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::handler::StorageHandler;
use crate::uri::{file_uri_to_path, path_to_file_uri};

/// Handler for `file://` references to local or mounted filesystems.
///
/// With `checksum` the digest is the MD5 of the file; without it the digest
/// is the URI itself and the content is never re-read.
#[derive(Debug, Default)]
pub struct LocalFileHandler;

impl LocalFileHandler {
    pub fn new() -> Self {
        Self
    }

    fn file_entry(
        &self,
        file: &Path,
        name: LogicalPath,
        checksum: bool,
    ) -> StoreResult<ManifestEntry> {
        let uri = path_to_file_uri(file);
        let size = fs::metadata(file).map_err(|e| StoreError::io(file, e))?.len();
        let digest = if checksum {
            md5_file_b64(file).map_err(|e| StoreError::io(file, e))?
        } else {
            uri.clone()
        };
        Ok(ManifestEntry::reference(name, uri, digest, Some(size)))
    }
}

impl StorageHandler for LocalFileHandler {
    fn name(&self) -> &'static str {
        "local-file"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        scheme == "file"
    }

    fn store_reference(
        &self,
        uri: &str,
        name: Option<&LogicalPath>,
        checksum: bool,
        max_objects: Option<usize>,
    ) -> StoreResult<Vec<ManifestEntry>> {
        let path = file_uri_to_path(uri)?;
        let meta = fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
            _ => StoreError::io(&path, e),
        })?;

        if meta.is_file() {
            let name = match name {
                Some(name) => name.clone(),
                None => {
                    let base = path
                        .file_name()
                        .ok_or_else(|| StoreError::invalid(uri, "no file name"))?;
                    LogicalPath::new(base.to_string_lossy())?
                }
            };
            return Ok(vec![self.file_entry(&path, name, checksum)?]);
        }

        let limit = max_objects.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for item in WalkDir::new(&path).follow_links(true).sort_by_file_name() {
            let item = item.map_err(|e| {
                let at = e.path().unwrap_or(&path).to_path_buf();
                StoreError::io(at, e.into())
            })?;
            if !item.file_type().is_file() {
                continue;
            }
            if entries.len() >= limit {
                warn!(uri, max_objects = limit, "reference directory listing capped");
                break;
            }
            let rel = item.path().strip_prefix(&path).unwrap_or(item.path());
            let rel = LogicalPath::from_relative(rel)?;
            let logical = match name {
                Some(base) => base.join(rel.as_str())?,
                None => rel,
            };
            entries.push(self.file_entry(item.path(), logical, checksum)?);
        }
        debug!(uri, count = entries.len(), "stored directory reference");
        Ok(entries)
    }

    fn load_path(&self, entry: &ManifestEntry) -> StoreResult<PathBuf> {
        let uri = entry
            .reference
            .as_deref()
            .ok_or_else(|| StoreError::invalid(entry.path.as_str(), "not a reference entry"))?;
        let path = file_uri_to_path(uri)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        if entry.digest != uri {
            let actual = md5_file_b64(&path).map_err(|e| StoreError::io(&path, e))?;
            if actual != entry.digest {
                return Err(StoreError::DigestMismatch {
                    path: entry.path.to_string(),
                    expected: entry.digest.clone(),
                    actual,
                });
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_crypto::md5_bytes_b64;

    fn lp(p: &str) -> LogicalPath {
        LogicalPath::new(p).unwrap()
    }

    #[test]
    fn single_file_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.csv");
        fs::write(&file, b"a,b\n").unwrap();

        let uri = path_to_file_uri(&file);
        let entries = LocalFileHandler
            .store_reference(&uri, None, true, None)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.as_str(), "data.csv");
        assert_eq!(entries[0].digest, md5_bytes_b64(b"a,b\n"));
        assert_eq!(entries[0].size, Some(4));
        assert_eq!(entries[0].reference.as_deref(), Some(uri.as_str()));
    }

    #[test]
    fn without_checksum_digest_is_uri() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x");
        fs::write(&file, b"1").unwrap();
        let uri = path_to_file_uri(&file);

        let entries = LocalFileHandler
            .store_reference(&uri, Some(&lp("named")), false, None)
            .unwrap();
        assert_eq!(entries[0].path.as_str(), "named");
        assert_eq!(entries[0].digest, uri);

        // Content changes are not detected without a checksum.
        fs::write(&file, b"2").unwrap();
        assert_eq!(LocalFileHandler.load_path(&entries[0]).unwrap(), file);
    }

    #[test]
    fn directory_expands_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();
        let uri = path_to_file_uri(dir.path());

        let entries = LocalFileHandler
            .store_reference(&uri, Some(&lp("ds")), true, None)
            .unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["ds/a.txt", "ds/b.txt", "ds/sub/c.txt"]);

        let capped = LocalFileHandler
            .store_reference(&uri, None, true, Some(2))
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn missing_target_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = path_to_file_uri(&dir.path().join("gone"));
        assert!(matches!(
            LocalFileHandler.store_reference(&uri, None, true, None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn load_detects_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"before").unwrap();
        let entries = LocalFileHandler
            .store_reference(&path_to_file_uri(&file), None, true, None)
            .unwrap();
        assert_eq!(LocalFileHandler.load_path(&entries[0]).unwrap(), file);

        fs::write(&file, b"after").unwrap();
        assert!(matches!(
            LocalFileHandler.load_path(&entries[0]),
            Err(StoreError::DigestMismatch { .. })
        ));

        fs::remove_file(&file).unwrap();
        assert!(matches!(
            LocalFileHandler.load_path(&entries[0]),
            Err(StoreError::NotFound(_))
        ));
    }
}
