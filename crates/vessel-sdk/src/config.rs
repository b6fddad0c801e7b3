use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vessel_store::DEFAULT_BUCKET_MAX_OBJECTS;

use crate::error::{ArtifactError, ArtifactResult};

/// Session configuration.
///
/// Every field has a default, so a TOML file only needs the keys it wants
/// to change:
///
/// ```toml
/// cache_dir = "/var/cache/vessel"
/// entity = "acme"
/// project = "vision"
/// download_workers = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselConfig {
    /// Root of the local cache (`obj/` content, `staging/` copies).
    pub cache_dir: PathBuf,
    /// Staging directory for draft copies; defaults to `<cache_dir>/staging`.
    pub staging_dir: Option<PathBuf>,
    /// Parent of default download roots (`<artifact_dir>/<name>:v<N>`).
    pub artifact_dir: PathBuf,
    pub entity: String,
    pub project: String,
    pub add_dir_workers: usize,
    pub download_workers: usize,
    pub upload_workers: usize,
    /// Prefix expansion cap for bucket references without an explicit cap.
    pub bucket_max_objects: usize,
}

impl Default for VesselConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".vessel/cache"),
            staging_dir: None,
            artifact_dir: PathBuf::from("artifacts"),
            entity: "default".into(),
            project: "uncategorized".into(),
            add_dir_workers: 8,
            download_workers: 32,
            upload_workers: 8,
            bucket_max_objects: DEFAULT_BUCKET_MAX_OBJECTS,
        }
    }
}

impl VesselConfig {
    /// Defaults rooted at `dir`: cache under `dir/cache`, downloads under
    /// `dir/artifacts`.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            cache_dir: dir.join("cache"),
            artifact_dir: dir.join("artifacts"),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> ArtifactResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ArtifactError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> ArtifactResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ArtifactResult<String> {
        toml::to_string(self).map_err(|e| ArtifactError::Config(e.to_string()))
    }

    pub fn validate(&self) -> ArtifactResult<()> {
        for (key, value) in [
            ("add_dir_workers", self.add_dir_workers),
            ("download_workers", self.download_workers),
            ("upload_workers", self.upload_workers),
        ] {
            if value == 0 {
                return Err(ArtifactError::Config(format!("{key} must be at least 1")));
            }
        }
        if self.entity.is_empty() || self.project.is_empty() {
            return Err(ArtifactError::Config(
                "entity and project must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn staging_path(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("staging"))
    }

    pub fn content_cache_path(&self) -> PathBuf {
        self.cache_dir.join("obj")
    }
}
