//! Reading committed artifacts back: entry lookup, downloads and
//! verification of a download root.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vessel_crypto::md5_file_b64;
use vessel_manifest::{LogicalPath, ManifestEntry};
use vessel_store::artifact_ref_uri;
use walkdir::WalkDir;

use crate::artifact::Artifact;
use crate::error::{ArtifactError, ArtifactResult};

/// Suffixes under which typed values are stored (`<name>.<type>.json`).
const TYPED_VALUE_SUFFIXES: &[&str] = &[
    "table",
    "joined-table",
    "partitioned-table",
    "image-file",
    "audio-file",
    "video-file",
    "html-file",
    "object3D-file",
    "molecule-file",
];

/// Outcome of a successful [`Artifact::verify`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Files whose digest matched the manifest.
    pub verified: usize,
    /// Reference entries, which are not checked.
    pub skipped_references: usize,
}

/// One entry of a committed artifact.
#[derive(Clone, Debug)]
pub struct ArtifactEntry {
    artifact: Artifact,
    entry: ManifestEntry,
}

impl ArtifactEntry {
    pub fn path(&self) -> &LogicalPath {
        &self.entry.path
    }

    pub fn digest(&self) -> &str {
        &self.entry.digest
    }

    pub fn size(&self) -> Option<u64> {
        self.entry.size
    }

    pub fn is_reference(&self) -> bool {
        self.entry.is_reference()
    }

    pub fn manifest_entry(&self) -> &ManifestEntry {
        &self.entry
    }

    /// Download this entry under `root` (default: the artifact's default
    /// root) and return the path written.
    pub fn download(&self, root: Option<&Path>) -> ArtifactResult<PathBuf> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => self.artifact.default_root()?,
        };
        self.artifact.session.materialize_entry(&self.entry, &root)
    }

    /// URI referencing this entry from another artifact.
    ///
    /// Pass it to [`Artifact::add_reference`] to reuse the content without
    /// copying it.
    pub fn ref_url(&self) -> ArtifactResult<String> {
        let inner = self.artifact.read();
        let identity = inner.identity("ref_url")?;
        Ok(artifact_ref_uri(&identity.id, &self.entry.path))
    }
}

impl Artifact {
    /// The entry at `name`, or at `name` with a typed-value suffix.
    pub fn get_path(&self, name: &str) -> ArtifactResult<ArtifactEntry> {
        let inner = self.read();
        inner.ensure_live("get_path")?;
        let exact = LogicalPath::new(name)?;
        let entry = inner
            .manifest
            .get(exact.as_str())
            .or_else(|| {
                TYPED_VALUE_SUFFIXES
                    .iter()
                    .find_map(|suffix| inner.manifest.get(&format!("{exact}.{suffix}.json")))
            })
            .cloned()
            .ok_or_else(|| ArtifactError::PathNotFound(name.to_string()))?;
        Ok(ArtifactEntry {
            artifact: self.clone(),
            entry,
        })
    }

    /// The exact entry at `path`.
    pub(crate) fn entry(&self, path: &LogicalPath) -> ArtifactResult<ManifestEntry> {
        let inner = self.read();
        inner.ensure_live("entry")?;
        inner
            .manifest
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| ArtifactError::PathNotFound(path.to_string()))
    }

    /// `<artifact_dir>/<name>:v<N>` (`-` instead of `:` on Windows).
    pub fn default_root(&self) -> ArtifactResult<PathBuf> {
        let name = self.read().identity("default_root")?.source.name();
        let dir_name = if cfg!(windows) {
            name.replace(':', "-")
        } else {
            name
        };
        Ok(self.session.config().artifact_dir.join(dir_name))
    }

    /// Download every entry under `root` (default: [`default_root`]).
    ///
    /// Files already under `root` that are not in the manifest are left
    /// alone. With `recursive`, artifacts this one references are downloaded
    /// to their own default roots as well.
    ///
    /// [`default_root`]: Artifact::default_root
    pub fn download(&self, root: Option<&Path>, recursive: bool) -> ArtifactResult<PathBuf> {
        let (root, entries, dependents) = {
            let inner = self.read();
            inner.ensure_live("download")?;
            let entries: Vec<ManifestEntry> = inner.manifest.entries().cloned().collect();
            (root, entries, inner.dependents.clone())
        };
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => self.default_root()?,
        };

        self.session.download_entries(&entries, &root)?;
        info!(artifact = %self.name(), files = entries.len(), root = %root.display(), "artifact downloaded");

        if recursive {
            self.download_dependents(dependents, &mut BTreeSet::new())?;
        }
        Ok(root)
    }

    fn download_dependents(
        &self,
        dependents: BTreeSet<vessel_types::ArtifactId>,
        seen: &mut BTreeSet<vessel_types::ArtifactId>,
    ) -> ArtifactResult<()> {
        for id in dependents {
            if !seen.insert(id.clone()) {
                continue;
            }
            let dependent = self.session.artifact_by_id(&id)?;
            dependent.download(None, false)?;
            let next = dependent.dependent_artifacts();
            dependent.download_dependents(next, seen)?;
        }
        Ok(())
    }

    /// Make `root` match the manifest: remove files that are not in it,
    /// then download.
    pub fn checkout(&self, root: Option<&Path>) -> ArtifactResult<PathBuf> {
        let (manifest, root) = {
            let inner = self.read();
            inner.ensure_live("checkout")?;
            (inner.manifest.clone(), root.map(Path::to_path_buf))
        };
        let root = match root {
            Some(root) => root,
            None => self.default_root()?,
        };

        if root.is_dir() {
            for (abs, logical) in files_under(&root)? {
                if !manifest.contains(logical.as_str()) {
                    fs::remove_file(&abs).map_err(|e| ArtifactError::io(&abs, e))?;
                    debug!(path = %abs.display(), "removed untracked file");
                }
            }
        }
        self.download(Some(&root), false)
    }

    /// Check a download root against the manifest.
    ///
    /// A file not in the manifest fails with `UntrackedFile`; a missing file
    /// or one whose content differs fails with `DigestMismatch`. Reference
    /// entries are skipped and counted.
    pub fn verify(&self, root: Option<&Path>) -> ArtifactResult<VerifyReport> {
        let (manifest, root) = {
            let inner = self.read();
            inner.ensure_live("verify")?;
            (inner.manifest.clone(), root.map(Path::to_path_buf))
        };
        let root = match root {
            Some(root) => root,
            None => self.default_root()?,
        };
        if !root.is_dir() {
            return Err(ArtifactError::NotADirectory(root));
        }

        for (_, logical) in files_under(&root)? {
            if !manifest.contains(logical.as_str()) {
                return Err(ArtifactError::UntrackedFile {
                    path: logical.to_string(),
                });
            }
        }

        let mut report = VerifyReport::default();
        for entry in manifest.entries() {
            if entry.is_reference() {
                report.skipped_references += 1;
                continue;
            }
            let local = entry.path.to_fs_path(&root);
            let mismatch = || ArtifactError::DigestMismatch {
                path: entry.path.to_string(),
            };
            if !local.is_file() {
                return Err(mismatch());
            }
            let actual = md5_file_b64(&local).map_err(|e| ArtifactError::io(&local, e))?;
            if actual != entry.digest {
                return Err(mismatch());
            }
            report.verified += 1;
        }
        debug!(root = %root.display(), verified = report.verified, skipped = report.skipped_references, "root verified");
        Ok(report)
    }

    /// Download a single-file artifact and return the file's path.
    pub fn file(&self, root: Option<&Path>) -> ArtifactResult<PathBuf> {
        let entry = {
            let inner = self.read();
            inner.ensure_live("file")?;
            if inner.manifest.len() != 1 {
                return Err(ArtifactError::InvalidState(format!(
                    "file() needs an artifact with exactly one entry, found {}",
                    inner.manifest.len()
                )));
            }
            let first = inner.manifest.entries().next().cloned();
            first
        };
        let entry = entry.ok_or_else(|| ArtifactError::Internal("manifest changed".into()))?;
        ArtifactEntry {
            artifact: self.clone(),
            entry,
        }
        .download(root)
    }
}

/// Regular files under `root` with their logical paths.
fn files_under(root: &Path) -> ArtifactResult<Vec<(PathBuf, LogicalPath)>> {
    let mut files = Vec::new();
    for item in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            ArtifactError::io(path, std::io::Error::from(e))
        })?;
        if !item.file_type().is_file() {
            continue;
        }
        let rel = item
            .path()
            .strip_prefix(root)
            .map_err(|e| ArtifactError::Internal(e.to_string()))?;
        let logical = LogicalPath::from_relative(rel)?;
        files.push((item.into_path(), logical));
    }
    Ok(files)
}
