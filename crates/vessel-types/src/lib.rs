//! Foundation types for Vessel.
//!
//! Every other Vessel crate depends on `vessel-types`. It holds the small,
//! behavior-light vocabulary shared across the workspace.
//!
//! # Key Types
//!
//! - [`ArtifactId`] -- server-assigned artifact identity
//! - [`ClientId`] -- locally generated identity of an in-process artifact
//! - [`CollectionPath`] / [`CollectionMembership`] -- where an artifact lives
//! - [`ArtifactState`] -- the Draft / Committed / Deleted lifecycle
//! - [`names`] -- artifact name, alias, and type validation

pub mod collection;
pub mod error;
pub mod id;
pub mod names;
pub mod state;

pub use collection::{CollectionMembership, CollectionPath, RunRef};
pub use error::TypeError;
pub use id::{ArtifactId, ClientId};
pub use names::{
    is_version_alias, validate_alias, validate_aliases, validate_artifact_name,
    validate_artifact_type,
};
pub use state::ArtifactState;
