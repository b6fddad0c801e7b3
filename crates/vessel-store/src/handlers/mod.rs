//! Built-in [`StorageHandler`](crate::StorageHandler) implementations.

pub mod artifact_ref;
pub mod local;
pub mod remote;

pub use artifact_ref::ArtifactRefHandler;
pub use local::LocalFileHandler;
pub use remote::{RemoteObjectHandler, DEFAULT_BUCKET_MAX_OBJECTS};
