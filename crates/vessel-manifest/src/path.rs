use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

/// A normalized path inside an artifact.
///
/// Always uses `/` as the separator, never starts or ends with one, and has
/// no empty, `.` or `..` components. Backslashes are treated as separators so
/// Windows-style input lands on the same key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalPath(String);

impl LogicalPath {
    /// Normalize a raw path string.
    ///
    /// # Examples
    ///
    /// ```
    /// use vessel_manifest::LogicalPath;
    ///
    /// let p = LogicalPath::new("/data//train/./a.csv").unwrap();
    /// assert_eq!(p.as_str(), "data/train/a.csv");
    /// assert!(LogicalPath::new("../escape").is_err());
    /// ```
    pub fn new(raw: impl AsRef<str>) -> ManifestResult<Self> {
        let raw = raw.as_ref();
        let mut parts = Vec::new();
        for part in raw.split(['/', '\\']) {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(ManifestError::InvalidPath {
                        path: raw.to_string(),
                        reason: "must not contain '..'".into(),
                    })
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            return Err(ManifestError::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".into(),
            });
        }
        Ok(Self(parts.join("/")))
    }

    /// Build a logical path from a relative filesystem path.
    pub fn from_relative(path: &Path) -> ManifestResult<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(ManifestError::InvalidPath {
                        path: path.display().to_string(),
                        reason: "must be a relative path without '..'".into(),
                    })
                }
            }
        }
        Self::new(parts.join("/"))
    }

    /// `self/child`, normalized.
    pub fn join(&self, child: &str) -> ManifestResult<Self> {
        Self::new(format!("{}/{}", self.0, child))
    }

    /// The last path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path as a relative filesystem path under `root`.
    pub fn to_fs_path(&self, root: &Path) -> std::path::PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl TryFrom<String> for LogicalPath {
    type Error = ManifestError;

    fn try_from(value: String) -> ManifestResult<Self> {
        Self::new(value)
    }
}

impl From<LogicalPath> for String {
    fn from(path: LogicalPath) -> Self {
        path.0
    }
}

impl AsRef<str> for LogicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalPath({})", self.0)
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators() {
        assert_eq!(LogicalPath::new("a/b/c").unwrap().as_str(), "a/b/c");
        assert_eq!(LogicalPath::new("/a/b").unwrap().as_str(), "a/b");
        assert_eq!(LogicalPath::new("a\\b\\c").unwrap().as_str(), "a/b/c");
        assert_eq!(LogicalPath::new("a//b/").unwrap().as_str(), "a/b");
        assert_eq!(LogicalPath::new("./a/./b").unwrap().as_str(), "a/b");
    }

    #[test]
    fn rejects_empty_and_parent() {
        assert!(LogicalPath::new("").is_err());
        assert!(LogicalPath::new("/").is_err());
        assert!(LogicalPath::new("a/../b").is_err());
    }

    #[test]
    fn from_relative_fs_path() {
        let p = LogicalPath::from_relative(Path::new("sub/dir/file.txt")).unwrap();
        assert_eq!(p.as_str(), "sub/dir/file.txt");
        assert!(LogicalPath::from_relative(Path::new("../x")).is_err());
    }

    #[test]
    fn join_and_file_name() {
        let base = LogicalPath::new("images").unwrap();
        let joined = base.join("train/cat.png").unwrap();
        assert_eq!(joined.as_str(), "images/train/cat.png");
        assert_eq!(joined.file_name(), "cat.png");
    }

    #[test]
    fn to_fs_path_nests_components() {
        let p = LogicalPath::new("a/b.txt").unwrap();
        assert_eq!(p.to_fs_path(Path::new("/root")), Path::new("/root/a/b.txt"));
    }

    #[test]
    fn deserialization_normalizes() {
        let p: LogicalPath = serde_json::from_str("\"/x//y\"").unwrap();
        assert_eq!(p.as_str(), "x/y");
        assert!(serde_json::from_str::<LogicalPath>("\"..\"").is_err());
    }
}
