//! High-level SDK for Vessel.
//!
//! A [`Vessel`] session ties together the metadata service, the content
//! store, the local caches and the storage handlers. Artifacts are created
//! as drafts, filled with files, directories and references, and committed
//! as immutable versions of a collection.
//!
//! # Lifecycle
//!
//! - [`Vessel::new_artifact`] -- a draft; content and fields are editable
//! - [`Artifact::save`] / [`Artifact::wait`] -- upload and register in the
//!   background; [`Artifact::commit`] does both
//! - [`Vessel::artifact`] -- look up `[[entity/]project/]name[:alias]`
//! - [`Artifact::download`] / [`Artifact::verify`] -- materialize and check
//!   a local copy
//! - [`Artifact::new_draft`] -- start the next version from a committed one
//!
//! Within one session there is at most one live [`Artifact`] object per
//! server id; every lookup returns a handle to the same state.

pub mod artifact;
mod commit;
pub mod config;
pub mod download;
pub mod error;
pub mod metadata;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact::{Artifact, ArtifactCell, DEFAULT_ALIAS, MAX_METADATA_KEYS};
pub use config::VesselConfig;
pub use download::{ArtifactEntry, VerifyReport};
pub use error::{ApiError, ApiResult, ArtifactError, ArtifactResult};
pub use metadata::{ArtifactAttrs, CreateArtifact, InMemoryMetadataService, MetadataClient};
pub use session::{Vessel, VesselBuilder, DEFAULT_BUCKET_SCHEMES};

// Re-export key types
pub use vessel_manifest::{LogicalPath, Manifest, ManifestEntry};
pub use vessel_types::{ArtifactId, ArtifactState, ClientId, CollectionMembership, CollectionPath, RunRef};
