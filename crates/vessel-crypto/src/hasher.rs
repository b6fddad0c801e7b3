/// Domain-separated BLAKE3 hasher.
///
/// Each hasher carries a domain tag (e.g. `"vessel-manifest-v1"`) that is
/// prepended to every hash computation, so two different kinds of value with
/// identical bytes never share a digest.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for manifest aggregate digests.
    pub const MANIFEST: Self = Self {
        domain: "vessel-manifest-v1",
    };
    /// Hasher for content-cache keys of remote references.
    pub const CACHE_KEY: Self = Self {
        domain: "vessel-cache-key-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// A streaming BLAKE3 hasher with the domain tag already absorbed.
    pub fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = self.start();
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hash raw bytes with domain separation, hex-encoded.
    pub fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }

    /// Verify that data produces the expected hex digest.
    pub fn verify_hex(&self, data: &[u8], expected: &str) -> bool {
        self.hash_hex(data) == expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
