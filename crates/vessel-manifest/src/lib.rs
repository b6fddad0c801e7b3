//! Artifact manifests for Vessel.
//!
//! A [`Manifest`] is the authoritative list of logical path → content
//! mappings for one artifact version. Each mapping is a [`ManifestEntry`]
//! carrying the content digest, the size when known, and -- for reference
//! entries -- the URI the content lives at.
//!
//! # Design Rules
//!
//! 1. Paths are normalized ([`LogicalPath`]) before they are used as keys.
//! 2. A path maps to at most one digest; re-adding identical content is a
//!    no-op, conflicting content is an error.
//! 3. The aggregate [`Manifest::digest`] ignores insertion order.
//! 4. The serialized form is a versioned [`ManifestDocument`].

pub mod entry;
pub mod error;
pub mod manifest;
pub mod path;

pub use entry::ManifestEntry;
pub use error::{ManifestError, ManifestResult};
pub use manifest::{Manifest, ManifestDocument, DEFAULT_STORAGE_POLICY, MANIFEST_VERSION};
pub use path::LogicalPath;
