use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use vessel_crypto::md5_file_b64;

use crate::error::{StoreError, StoreResult};

/// Directory holding engine-owned copies of files added to drafts.
///
/// Copies are taken at add time so later edits to the caller's file never
/// leak into the artifact. Kept copies are read-only.
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

/// A file copied into the staging area but not yet kept.
///
/// Dropping it removes the copy.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    digest: String,
    size: u64,
}

impl StagedFile {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the copy on disk, read-only, and return its path.
    pub fn keep(self) -> StoreResult<PathBuf> {
        let path = self.file.path().to_path_buf();
        let mut perms = fs::metadata(&path)
            .map_err(|e| StoreError::io(&path, e))?
            .permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).map_err(|e| StoreError::io(&path, e))?;
        let (_, kept) = self
            .file
            .keep()
            .map_err(|e| StoreError::io(&path, e.error))?;
        Ok(kept)
    }
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `src` into the staging area and hash the copy.
    pub fn stage_copy(&self, src: &Path) -> StoreResult<StagedFile> {
        self.stage_with(|dest| {
            let mut source = File::open(src).map_err(|e| StoreError::io(src, e))?;
            io::copy(&mut source, dest).map_err(|e| StoreError::io(src, e))?;
            Ok(())
        })
    }

    /// Create a staged file whose content is produced by `write`.
    ///
    /// If `write` fails the partial file is removed.
    pub fn stage_with<F>(&self, write: F) -> StoreResult<StagedFile>
    where
        F: FnOnce(&mut File) -> StoreResult<()>,
    {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut file = NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        write(file.as_file_mut())?;
        file.as_file_mut()
            .flush()
            .map_err(|e| StoreError::io(file.path(), e))?;

        let digest = md5_file_b64(file.path()).map_err(|e| StoreError::io(file.path(), e))?;
        let size = file
            .as_file()
            .metadata()
            .map_err(|e| StoreError::io(file.path(), e))?
            .len();
        debug!(path = %file.path().display(), size, "staged file");
        Ok(StagedFile { file, digest, size })
    }

    /// Remove a kept copy. Failures are logged, not returned.
    pub fn release(&self, path: &Path) {
        if !path.starts_with(&self.dir) {
            return;
        }
        if let Ok(meta) = fs::metadata(path) {
            let mut perms = meta.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove staged file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_crypto::md5_bytes_b64;

    #[test]
    fn staged_copy_is_independent_of_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"original").unwrap();

        let staging = StagingArea::new(dir.path().join("staging"));
        let staged = staging.stage_copy(&src).unwrap();
        assert_eq!(staged.digest(), md5_bytes_b64(b"original"));
        assert_eq!(staged.size(), 8);
        let kept = staged.keep().unwrap();

        fs::write(&src, b"changed").unwrap();
        assert_eq!(fs::read(&kept).unwrap(), b"original");
        assert!(fs::metadata(&kept).unwrap().permissions().readonly());
    }

    #[test]
    fn dropped_stage_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        fs::write(&src, b"x").unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));

        let path = {
            let staged = staging.stage_copy(&src).unwrap();
            staged.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn failed_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        let err = staging
            .stage_with(|f| {
                f.write_all(b"partial").map_err(|e| StoreError::io("w", e))?;
                Err(StoreError::NotFound("writer gave up".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(fs::read_dir(staging.dir()).unwrap().count(), 0);
    }

    #[test]
    fn release_removes_read_only_copy() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging"));
        let kept = staging
            .stage_with(|f| f.write_all(b"data").map_err(|e| StoreError::io("w", e)))
            .unwrap()
            .keep()
            .unwrap();
        staging.release(&kept);
        assert!(!kept.exists());
    }

    #[test]
    fn missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path());
        assert!(matches!(
            staging.stage_copy(&dir.path().join("nope")),
            Err(StoreError::Io { .. })
        ));
    }
}
