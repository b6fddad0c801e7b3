use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Server-assigned identity of a committed artifact.
///
/// The metadata service chooses the format; Vessel treats it as an opaque
/// string. Inside reference URIs the id is hex-encoded so that it survives as
/// a URI host component regardless of the characters the service uses.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Wrap a server-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as the service returned it.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex encoding of the identifier bytes (used in reference URIs).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Decode an identifier previously produced by [`ArtifactId::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let id = String::from_utf8(bytes).map_err(|_| TypeError::InvalidUtf8)?;
        Ok(Self(id))
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated identity of an artifact object.
///
/// Assigned at construction and stable for the lifetime of the object, so a
/// draft can be tracked before the server has seen it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh, time-ordered client id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short representation (first 8 hex characters).
    pub fn short_id(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.short_id())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
