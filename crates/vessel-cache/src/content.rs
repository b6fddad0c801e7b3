use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

type Flight = Arc<OnceLock<Result<PathBuf, String>>>;

/// On-disk content cache with single-flight fills.
pub struct ContentCache {
    root: PathBuf,
    flights: Mutex<HashMap<String, Flight>>,
}

impl ContentCache {
    /// Create a cache storing content under `root`. The directory is created
    /// on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cached file for `key`, if present with the expected size.
    pub fn lookup(&self, key: &CacheKey, size: Option<u64>) -> Option<PathBuf> {
        let path = key.path_in(&self.root);
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }
        match size {
            Some(expected) if expected != meta.len() => None,
            _ => Some(path),
        }
    }

    /// Return the cached file for `key`, filling it with `fill` on a miss.
    ///
    /// Concurrent callers for the same key share one fill: the first caller
    /// runs it and the rest block until it finishes. A failed fill is not
    /// remembered; the next caller tries again. The caller that ran the fill
    /// gets its own error back, the others get [`CacheError::FetchFailed`].
    pub fn fetch<E, F>(&self, key: &CacheKey, size: Option<u64>, fill: F) -> Result<PathBuf, E>
    where
        F: FnOnce(&mut File) -> Result<(), E>,
        E: From<CacheError> + fmt::Display,
    {
        if let Some(hit) = self.lookup(key, size) {
            return Ok(hit);
        }

        let flight = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                flights
                    .entry(key.as_str().to_string())
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };

        let mut own_error: Option<E> = None;
        let outcome = flight
            .get_or_init(|| {
                // A flight for this key may have completed between the disk
                // check above and joining this one.
                if let Some(hit) = self.lookup(key, size) {
                    return Ok(hit);
                }
                match self.write_entry(key, size, fill) {
                    Ok(path) => Ok(path),
                    Err(e) => {
                        let reason = e.to_string();
                        own_error = Some(e);
                        Err(reason)
                    }
                }
            })
            .clone();

        {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            if flights
                .get(key.as_str())
                .is_some_and(|current| Arc::ptr_eq(current, &flight))
            {
                flights.remove(key.as_str());
            }
        }

        match outcome {
            Ok(path) => Ok(path),
            Err(reason) => Err(own_error.unwrap_or_else(|| {
                CacheError::FetchFailed {
                    key: key.to_string(),
                    reason,
                }
                .into()
            })),
        }
    }

    /// Copy a local file into the cache under `key`.
    pub fn insert_file(&self, key: &CacheKey, src: &Path) -> CacheResult<PathBuf> {
        let size = fs::metadata(src).map_err(|e| CacheError::io(src, e))?.len();
        self.fetch(key, Some(size), |dest: &mut File| {
            let mut source = File::open(src).map_err(|e| CacheError::io(src, e))?;
            io::copy(&mut source, dest).map_err(|e| CacheError::io(src, e))?;
            Ok(())
        })
    }

    /// Number of fills currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn write_entry<E, F>(&self, key: &CacheKey, size: Option<u64>, fill: F) -> Result<PathBuf, E>
    where
        F: FnOnce(&mut File) -> Result<(), E>,
        E: From<CacheError>,
    {
        let dest = key.path_in(&self.root);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        fill(tmp.as_file_mut())?;
        tmp.as_file_mut()
            .flush()
            .map_err(|e| CacheError::io(tmp.path(), e))?;

        let actual = tmp
            .as_file()
            .metadata()
            .map_err(|e| CacheError::io(tmp.path(), e))?
            .len();
        if let Some(expected) = size {
            if expected != actual {
                return Err(CacheError::SizeMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                }
                .into());
            }
        }

        tmp.persist(&dest)
            .map_err(|e| CacheError::io(&dest, e.error))?;
        debug!(key = %key, size = actual, "cache entry written");
        Ok(dest)
    }
}

impl fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentCache")
            .field("root", &self.root)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
