//! Shared fixture for in-crate tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use vessel_store::{ContentStore, InMemoryContentStore, InMemoryObjectSource, ObjectSource};

use crate::config::VesselConfig;
use crate::metadata::{InMemoryMetadataService, MetadataClient};
use crate::session::Vessel;

static SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// A session over in-memory services, rooted in a temporary directory.
///
/// Extra sessions from [`Harness::second_session`] share the services but
/// not the local cache, like a second process on another machine.
pub(crate) struct Harness {
    pub dir: TempDir,
    pub service: Arc<InMemoryMetadataService>,
    pub store: Arc<InMemoryContentStore>,
    pub objects: Arc<InMemoryObjectSource>,
    pub vessel: Vessel,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(InMemoryMetadataService::new());
        let store = Arc::new(InMemoryContentStore::new());
        let objects = Arc::new(InMemoryObjectSource::new());
        let vessel = session(&dir.path().join(".vessel"), &service, &store, &objects);
        Self {
            dir,
            service,
            store,
            objects,
            vessel,
        }
    }

    /// Write `data` to `rel` under the temp dir, creating parents.
    pub fn write(&self, rel: &str, data: &[u8]) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, data).unwrap();
        path
    }

    pub fn second_session(&self) -> Vessel {
        let n = SESSIONS.fetch_add(1, Ordering::Relaxed);
        let root = self.dir.path().join(format!(".vessel-{n}"));
        session(&root, &self.service, &self.store, &self.objects)
    }
}

fn session(
    root: &Path,
    service: &Arc<InMemoryMetadataService>,
    store: &Arc<InMemoryContentStore>,
    objects: &Arc<InMemoryObjectSource>,
) -> Vessel {
    let mut config = VesselConfig::rooted_at(root);
    config.entity = "acme".into();
    config.project = "vision".into();
    config.add_dir_workers = 4;
    config.download_workers = 4;
    config.upload_workers = 2;
    Vessel::builder(config)
        .metadata_client(Arc::clone(service) as Arc<dyn MetadataClient>)
        .content_store(Arc::clone(store) as Arc<dyn ContentStore>)
        .bucket_source(Arc::clone(objects) as Arc<dyn ObjectSource>)
        .build()
        .unwrap()
}
