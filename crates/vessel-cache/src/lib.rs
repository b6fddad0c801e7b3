//! Artifact registry and content cache for Vessel.
//!
//! [`ArtifactsCache`] is a process-scoped service injected into a session.
//! It has three indices, the last one living in a shared [`ContentCache`]:
//!
//! - **drafts** -- `ClientId -> Weak<T>`, pruned when the draft is dropped or
//!   promoted
//! - **committed** -- `ArtifactId -> Arc<T>`, first registration wins
//! - **content** -- on-disk blobs keyed by [`CacheKey`], filled through a
//!   single-flight so that each key is fetched at most once at a time
//!
//! # Design Rules
//!
//! 1. Disk hits (file present with the expected size) never wait on a flight.
//! 2. Content is written to a temp file in the cache root and renamed into
//!    place, so readers never observe a partial blob.
//! 3. Failed fetches are forgotten; the next caller retries.

pub mod cache;
pub mod content;
pub mod error;
pub mod key;

pub use cache::ArtifactsCache;
pub use content::ContentCache;
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
