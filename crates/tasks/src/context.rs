use crate::download::{Downloader, HttpDownloader};
use crate::error::{ErrorKind, Result};
use crate::progress::{ProgressSink, TracingSink};
use exn::ResultExt;
use ferry_config::{Config, RepairConfig};
use ferry_db::{Database, Store};
use ferry_storage::BackendHandle;
use ferry_storage::backend::LocalBackend;
use std::sync::Arc;

/// Limits for artifact repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    /// Repairs (downloads) allowed in flight at once.
    pub max_concurrent_repairs: usize,
    /// Artifact files checked at once.
    pub checksum_workers: usize,
    /// Whether callers should verify checksums when they do not say otherwise.
    pub verify_checksums: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self::from(&RepairConfig::default())
    }
}

impl From<&RepairConfig> for RepairOptions {
    fn from(config: &RepairConfig) -> Self {
        Self {
            max_concurrent_repairs: config.max_concurrent_repairs.max(1),
            checksum_workers: config.checksum_workers.max(1),
            verify_checksums: config.verify_checksums,
        }
    }
}

/// Everything a task needs to talk to the outside world.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub storage: BackendHandle,
    pub downloader: Arc<dyn Downloader>,
    pub progress: Arc<dyn ProgressSink>,
    pub repair: RepairOptions,
}

impl Context {
    pub fn new(store: Store, storage: BackendHandle, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            store,
            storage,
            downloader,
            progress: Arc::new(TracingSink),
            repair: RepairOptions::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_repair_options(mut self, options: RepairOptions) -> Self {
        self.repair = options;
        self
    }

    /// Connect to the configured database and local storage, downloading
    /// over HTTP.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let db = Database::connect(&config.database.path, config.database.max_connections)
            .await
            .or_raise(|| ErrorKind::Store)?;
        let storage = LocalBackend::new("local", &config.storage.root).or_raise(|| ErrorKind::Storage)?;
        let downloader = HttpDownloader::new(&config.download)?;
        Ok(Self::new(Store::from(&db), Arc::new(storage), Arc::new(downloader))
            .with_repair_options(RepairOptions::from(&config.repair)))
    }
}
