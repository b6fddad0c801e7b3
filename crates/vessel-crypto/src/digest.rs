use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};

/// Errors from digest encoding conversions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid base64 digest {0:?}")]
    InvalidBase64(String),

    #[error("invalid hex digest {0:?}")]
    InvalidHex(String),
}

const READ_CHUNK: usize = 64 * 1024;

/// Base64 MD5 of an in-memory buffer.
pub fn md5_bytes_b64(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

/// Base64 MD5 of everything readable from `reader`.
pub fn md5_reader_b64<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Base64 MD5 of a file's bytes, streamed from disk.
pub fn md5_file_b64(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    md5_reader_b64(BufReader::new(file))
}

/// Convert a base64 digest to lowercase hex (used for on-disk cache paths).
pub fn b64_to_hex(b64: &str) -> Result<String, DigestError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|_| DigestError::InvalidBase64(b64.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Convert a hex digest back to base64.
pub fn hex_to_b64(hex_digest: &str) -> Result<String, DigestError> {
    let bytes =
        hex::decode(hex_digest).map_err(|_| DigestError::InvalidHex(hex_digest.to_string()))?;
    Ok(STANDARD.encode(bytes))
}
