//! Digest primitives for Vessel.
//!
//! Two hash families are in use:
//!
//! - **File digests** identify the bytes of one file: base64-encoded MD5,
//!   computed in streaming fashion ([`md5_file_b64`]). This is the value
//!   stored in a manifest entry's `digest` field and the key of the content
//!   cache.
//! - **Aggregate digests** identify composite values such as a whole
//!   manifest: domain-separated BLAKE3 via [`ContentHasher`], hex-encoded.
//!
//! All crypto operations wrap established libraries.

pub mod digest;
pub mod hasher;

pub use digest::{
    b64_to_hex, hex_to_b64, md5_bytes_b64, md5_file_b64, md5_reader_b64, DigestError,
};
pub use hasher::ContentHasher;
