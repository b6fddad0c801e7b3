//! Storage for Vessel artifacts.
//!
//! This crate decides where artifact content lives. Files added to a draft
//! are copied into a [`StagingArea`], uploaded to a [`ContentStore`] on
//! commit, and brought back through the shared content cache. References
//! stay where they are; a [`StorageHandler`] per URI scheme reads their
//! metadata at store time and fetches their content on load.
//!
//! # Handlers
//!
//! Registered on a [`StoragePolicy`] in priority order, first match wins:
//!
//! - [`ArtifactRefHandler`] -- `vessel-artifact://`, entries of other
//!   artifacts, resolved through an [`ArtifactResolver`]
//! - [`LocalFileHandler`] -- `file://`
//! - [`RemoteObjectHandler`] -- `http(s)://` and bucket schemes, through an
//!   [`ObjectSource`]
//!
//! # Backends
//!
//! - [`InMemoryContentStore`] / [`InMemoryObjectSource`] -- tests and embedding
//! - [`HttpContentStore`] / [`HttpObjectSource`] -- blocking HTTP
//!
//! # Design Rules
//!
//! 1. Storing a reference never downloads its content.
//! 2. Unknown schemes fail with [`StoreError::UnsupportedReference`].
//! 3. Cross-artifact chains are flattened when stored.
//! 4. Paths returned by `load_path` are shared and must not be modified.

pub mod content;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod http;
pub mod memory;
pub mod policy;
pub mod source;
pub mod staging;
pub mod uri;

pub use content::ContentStore;
pub use error::{StoreError, StoreResult};
pub use handler::{ArtifactResolver, StorageHandler};
pub use handlers::{
    ArtifactRefHandler, LocalFileHandler, RemoteObjectHandler, DEFAULT_BUCKET_MAX_OBJECTS,
};
pub use http::{HttpContentStore, HttpObjectSource};
pub use memory::{InMemoryContentStore, InMemoryObjectSource};
pub use policy::{StagedEntry, StoragePolicy};
pub use source::{ObjectMeta, ObjectSource};
pub use staging::{StagedFile, StagingArea};
pub use uri::{artifact_ref_uri, parse_artifact_ref, path_to_file_uri, ARTIFACT_SCHEME};
