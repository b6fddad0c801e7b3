use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Fully qualified location of a collection: `entity/project/name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionPath {
    pub entity: String,
    pub project: String,
    pub name: String,
}

impl CollectionPath {
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            project: project.into(),
            name: name.into(),
        }
    }

    /// Parse `name`, `project/name` or `entity/project/name`, filling the
    /// missing components from the defaults.
    ///
    /// Version or alias suffixes (`:latest`) are rejected; a collection path
    /// names the collection, not one of its members.
    pub fn parse(
        path: &str,
        default_entity: &str,
        default_project: &str,
    ) -> Result<Self, TypeError> {
        if path.contains(':') {
            return Err(TypeError::InvalidCollectionPath {
                path: path.to_string(),
                reason: "must not contain ':'".into(),
            });
        }
        let parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(TypeError::InvalidCollectionPath {
                path: path.to_string(),
                reason: "components must not be empty".into(),
            });
        }
        match parts.as_slice() {
            [name] => Ok(Self::new(default_entity, default_project, *name)),
            [project, name] => Ok(Self::new(default_entity, *project, *name)),
            [entity, project, name] => Ok(Self::new(*entity, *project, *name)),
            _ => Err(TypeError::InvalidCollectionPath {
                path: path.to_string(),
                reason: "expected at most three components".into(),
            }),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.project, self.name)
    }
}

/// Membership of one artifact version in one collection.
///
/// An artifact belongs to exactly one sequence (its primary collection) and
/// may be linked into any number of portfolios; each membership carries its
/// own version index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionMembership {
    pub entity: String,
    pub project: String,
    pub collection: String,
    pub version_index: u64,
}

impl CollectionMembership {
    /// The implicit version alias, e.g. `v3`.
    pub fn version(&self) -> String {
        format!("v{}", self.version_index)
    }

    /// `collection:vN`.
    pub fn name(&self) -> String {
        format!("{}:v{}", self.collection, self.version_index)
    }

    /// `entity/project/collection:vN`.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}/{}", self.entity, self.project, self.name())
    }

    pub fn collection_path(&self) -> CollectionPath {
        CollectionPath::new(&self.entity, &self.project, &self.collection)
    }
}

/// A run known to the metadata service (producer or consumer of artifacts).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub entity: String,
    pub project: String,
    pub name: String,
}
