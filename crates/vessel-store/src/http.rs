use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG};
use tracing::debug;
use url::Url;
use vessel_crypto::b64_to_hex;

use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::source::{ObjectMeta, ObjectSource};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn build_client(timeout: Duration) -> StoreResult<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn check_status(uri: &str, response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(uri.to_string()));
    }
    if !status.is_success() {
        return Err(StoreError::Remote {
            uri: uri.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// Content store speaking plain HTTP to a blob service.
///
/// Layout under the base URL:
///
/// - `objects/<hex digest>` -- file content (`HEAD`, `GET`, `PUT`)
/// - `manifests/<digest>` -- manifest documents (`GET`, `PUT`)
pub struct HttpContentStore {
    base: Url,
    client: Client,
}

impl HttpContentStore {
    pub fn new(base_url: &str) -> StoreResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> StoreResult<Self> {
        // Url::join drops the last path segment unless it ends in '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base =
            Url::parse(&normalized).map_err(|e| StoreError::invalid(base_url, e.to_string()))?;
        Ok(Self {
            base,
            client: build_client(timeout)?,
        })
    }

    fn object_url(&self, digest: &str) -> StoreResult<Url> {
        let hex = b64_to_hex(digest)?;
        self.base
            .join(&format!("objects/{hex}"))
            .map_err(|e| StoreError::invalid(digest, e.to_string()))
    }
}

impl ContentStore for HttpContentStore {
    fn upload(&self, digest: &str, src: &Path) -> StoreResult<bool> {
        if self.contains(digest)? {
            return Ok(false);
        }
        let url = self.object_url(digest)?;
        let file = File::open(src).map_err(|e| StoreError::io(src, e))?;
        let response = self.client.put(url.clone()).body(file).send()?;
        check_status(url.as_str(), response)?;
        debug!(url = %url, "content uploaded");
        Ok(true)
    }

    fn contains(&self, digest: &str) -> StoreResult<bool> {
        let url = self.object_url(digest)?;
        let response = self.client.head(url.clone()).send()?;
        match check_status(url.as_str(), response) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn download(&self, digest: &str, dest: &mut dyn Write) -> StoreResult<u64> {
        let url = self.object_url(digest)?;
        let response = self.client.get(url.clone()).send()?;
        let mut response = check_status(url.as_str(), response)?;
        Ok(response.copy_to(dest)?)
    }

    fn put_manifest(&self, digest: &str, document: &[u8]) -> StoreResult<String> {
        let url = self
            .base
            .join(&format!("manifests/{digest}"))
            .map_err(|e| StoreError::invalid(digest, e.to_string()))?;
        let response = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document.to_vec())
            .send()?;
        check_status(url.as_str(), response)?;
        Ok(url.to_string())
    }

    fn get_manifest(&self, url: &str) -> StoreResult<Vec<u8>> {
        let response = self.client.get(url).send()?;
        let response = check_status(url, response)?;
        Ok(response.bytes()?.to_vec())
    }
}

impl std::fmt::Debug for HttpContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContentStore")
            .field("base", &self.base.as_str())
            .finish()
    }
}

/// Object source for `http://` and `https://` references.
///
/// Size and digest come from the `Content-Length` and `ETag` headers of a
/// `HEAD` request. HTTP has no listing, so every reference is one object.
pub struct HttpObjectSource {
    client: Client,
}

impl HttpObjectSource {
    pub fn new() -> StoreResult<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

impl ObjectSource for HttpObjectSource {
    fn head(&self, uri: &str) -> StoreResult<ObjectMeta> {
        let response = self.client.head(uri).send()?;
        let response = check_status(uri, response)?;
        Ok(object_meta(uri, response.headers()))
    }

    fn list(&self, uri: &str, max: usize) -> StoreResult<Vec<ObjectMeta>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![self.head(uri)?])
    }

    fn fetch(&self, uri: &str, _version_id: Option<&str>, dest: &mut dyn Write) -> StoreResult<u64> {
        let response = self.client.get(uri).send()?;
        let mut response = check_status(uri, response)?;
        Ok(response.copy_to(dest)?)
    }
}

/// Size and ETag of `uri` from its response headers.
fn object_meta(uri: &str, headers: &HeaderMap) -> ObjectMeta {
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    ObjectMeta {
        uri: uri.to_string(),
        size,
        etag,
        version_id: None,
    }
}

impl std::fmt::Debug for HttpObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpObjectSource").finish()
    }
}
