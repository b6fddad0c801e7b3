use std::fmt;
use std::path::{Path, PathBuf};

use vessel_crypto::{b64_to_hex, ContentHasher, DigestError};

use crate::error::{CacheError, CacheResult};

/// Relative location of one cached blob under the cache root.
///
/// - `md5/<hex[..2]>/<hex[2..]>` for content addressed by file digest
/// - `etag/<blake3(uri, etag)>` for remote objects addressed by ETag
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for file content with the given base64 MD5 digest.
    pub fn for_digest(md5_b64: &str) -> CacheResult<Self> {
        let hex = b64_to_hex(md5_b64)?;
        if hex.len() < 3 {
            return Err(CacheError::InvalidDigest(DigestError::InvalidBase64(
                md5_b64.to_string(),
            )));
        }
        Ok(Self(format!("md5/{}/{}", &hex[..2], &hex[2..])))
    }

    /// Key for a remote object identified by its URI and ETag.
    pub fn for_remote(uri: &str, etag: &str) -> Self {
        let mut hasher = ContentHasher::CACHE_KEY.start();
        hasher.update(uri.as_bytes());
        hasher.update(&[0]);
        hasher.update(etag.as_bytes());
        Self(format!("etag/{}", hasher.finalize().to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute location of this key under `root`.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_crypto::md5_bytes_b64;

    #[test]
    fn digest_key_layout() {
        let key = CacheKey::for_digest(&md5_bytes_b64(b"hello")).unwrap();
        assert_eq!(key.as_str(), "md5/5d/41402abc4b2a76b9719d911017c592");
        assert_eq!(
            key.path_in(Path::new("/cache")),
            Path::new("/cache/md5/5d/41402abc4b2a76b9719d911017c592")
        );
    }

    #[test]
    fn digest_key_rejects_garbage() {
        assert!(CacheKey::for_digest("!!").is_err());
        assert!(CacheKey::for_digest("").is_err());
    }

    #[test]
    fn remote_key_depends_on_uri_and_etag() {
        let a = CacheKey::for_remote("s3://b/k", "e1");
        let b = CacheKey::for_remote("s3://b/k", "e2");
        let c = CacheKey::for_remote("s3://b/other", "e1");
        assert!(a.as_str().starts_with("etag/"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, CacheKey::for_remote("s3://b/k", "e1"));
    }
}
