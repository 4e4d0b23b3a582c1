//! The offline cache worker: install, activate, fetch and sync handlers
//! over one deployed version.

mod activate;
mod fetch;
mod install;
mod sync;

use std::sync::Arc;

use reqwest::Url;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheStorage, DiskCacheStorage};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::host::WorkerHost;
use crate::lifecycle::{Lifecycle, WorkerState};
use crate::network::{HttpNetwork, Network};
use crate::queue::SubmissionQueue;
use crate::scope::{RuntimeCachePolicy, Scope};
use crate::stats::WorkerStats;

pub use activate::{ActivateReport, evict_stale_caches};
pub use fetch::{FetchOutcome, ResponseSource};
pub(crate) use fetch::bad_gateway;
pub use install::InstallReport;
pub use sync::{SubmitOutcome, SyncReport};

/// One deployed version of the offline cache worker.
///
/// Every piece of worker-scoped state (version, manifest, endpoints) comes
/// from the [`WorkerConfig`] passed in, so several versions can coexist
/// against the same storage.
pub struct OfflineWorker<S: CacheStorage = DiskCacheStorage, N: Network = HttpNetwork> {
    config: WorkerConfig,
    cache_name: String,
    offline_url: Url,
    root_url: Url,
    submit_url: Url,
    scope: Scope,
    policy: RuntimeCachePolicy,
    storage: Arc<S>,
    network: Arc<N>,
    queue: Arc<dyn SubmissionQueue>,
    host: Arc<dyn WorkerHost>,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<WorkerStats>,
    background: TaskTracker,
}

impl<S: CacheStorage + 'static, N: Network + 'static> OfflineWorker<S, N> {
    /// Creates a worker for the version described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin or any endpoint URL does not resolve.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<S>,
        network: Arc<N>,
        queue: Arc<dyn SubmissionQueue>,
        host: Arc<dyn WorkerHost>,
    ) -> Result<Self> {
        Ok(Self {
            cache_name: config.cache_name(),
            offline_url: config.resolve(&config.offline_url)?,
            root_url: config.resolve(&config.root_url)?,
            submit_url: config.resolve(&config.submit_endpoint)?,
            scope: Scope::from_config(&config)?,
            policy: RuntimeCachePolicy::from(&config.runtime_cache),
            config,
            storage,
            network,
            queue,
            host,
            lifecycle: Arc::new(Lifecycle::new()),
            stats: Arc::new(WorkerStats::new()),
            background: TaskTracker::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the bucket this version owns.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    #[must_use]
    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn SubmissionQueue> {
        &self.queue
    }

    /// Waits for every background cache write started so far.
    pub async fn settle(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Marks this version as replaced by a newer one.
    pub(crate) fn retire(&self) {
        self.lifecycle.finish(WorkerState::Redundant);
    }
}
