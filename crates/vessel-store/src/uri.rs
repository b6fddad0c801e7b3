//! Reference URI helpers.

use std::path::{Path, PathBuf};

use url::Url;
use vessel_manifest::LogicalPath;
use vessel_types::ArtifactId;

use crate::error::{StoreError, StoreResult};

/// Scheme of references that point into another artifact.
pub const ARTIFACT_SCHEME: &str = "vessel-artifact";

/// Split `scheme://rest`. Returns `None` when there is no `://` or `uri`
/// does not parse as a URL.
pub fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    let parsed = Url::parse(uri).ok()?;
    parsed
        .scheme()
        .eq_ignore_ascii_case(scheme)
        .then_some((scheme, rest))
}

/// Scheme of `uri`, or [`StoreError::InvalidReference`] if it has none.
pub fn scheme_of(uri: &str) -> StoreResult<&str> {
    split_scheme(uri)
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| StoreError::invalid(uri, "missing URI scheme"))
}

/// The last non-empty path segment of a URI (`http://h/a/b.txt` -> `b.txt`).
pub fn basename(uri: &str) -> Option<&str> {
    let rest = split_scheme(uri).map_or(uri, |(_, rest)| rest);
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let (_, path) = rest.split_once('/')?;
    path.rsplit('/').find(|seg| !seg.is_empty())
}

/// Local path named by a `file://` URI.
pub fn file_uri_to_path(uri: &str) -> StoreResult<PathBuf> {
    if let Ok(parsed) = Url::parse(uri) {
        if let Ok(path) = parsed.to_file_path() {
            return Ok(path);
        }
    }
    match uri.strip_prefix("file://") {
        Some(rest) if !rest.is_empty() => Ok(PathBuf::from(rest)),
        _ => Err(StoreError::invalid(uri, "not a file URI")),
    }
}

/// `file://` URI for a local path.
pub fn path_to_file_uri(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", path.display()),
    }
}

/// `vessel-artifact://<hex(id)>/<path>`.
pub fn artifact_ref_uri(id: &ArtifactId, path: &LogicalPath) -> String {
    format!("{ARTIFACT_SCHEME}://{}/{}", id.to_hex(), path)
}

/// Parse a cross-artifact reference back into its target.
pub fn parse_artifact_ref(uri: &str) -> StoreResult<(ArtifactId, LogicalPath)> {
    let rest = match split_scheme(uri) {
        Some((ARTIFACT_SCHEME, rest)) => rest,
        _ => return Err(StoreError::invalid(uri, "not an artifact reference")),
    };
    let (id_hex, path) = rest
        .split_once('/')
        .ok_or_else(|| StoreError::invalid(uri, "missing entry path"))?;
    let id = ArtifactId::from_hex(id_hex).map_err(|e| StoreError::invalid(uri, e.to_string()))?;
    let path = LogicalPath::new(path).map_err(|e| StoreError::invalid(uri, e.to_string()))?;
    Ok((id, path))
}
