//! Version handover between worker generations.
//!
//! A [`Registration`] owns the worker that currently controls the site. A
//! new version is installed next to it and only takes over once its
//! precache succeeded, so a broken deploy never leaves the site without a
//! working cache. The active version is recorded on disk so the next run can
//! serve from its bucket before the network is reachable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::{CacheStorage, DiskCacheStorage};
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::network::{HttpNetwork, Network};
use crate::worker::{FetchOutcome, OfflineWorker, SubmitOutcome, SyncReport, bad_gateway};

/// The version that was last activated, kept across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub version: String,
    pub cache_name: String,
    pub activated_at: DateTime<Utc>,
}

impl ActiveRecord {
    /// File name used inside the state directory.
    pub const FILE_NAME: &'static str = "active-version.json";

    fn of<S: CacheStorage + 'static, N: Network + 'static>(worker: &OfflineWorker<S, N>) -> Self {
        Self {
            version: worker.config().version.clone(),
            cache_name: worker.cache_name().to_string(),
            activated_at: Utc::now(),
        }
    }

    /// Reads the record at `path`. A missing file is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the record to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

/// Holds the active worker version and routes events to it.
pub struct Registration<S: CacheStorage = DiskCacheStorage, N: Network = HttpNetwork> {
    active: RwLock<Option<Arc<OfflineWorker<S, N>>>>,
    network: Arc<N>,
    record_path: Option<PathBuf>,
}

impl<S: CacheStorage + 'static, N: Network + 'static> Registration<S, N> {
    /// Creates an empty registration. `network` serves requests while no
    /// version is active.
    #[must_use]
    pub fn new(network: Arc<N>) -> Self {
        Self {
            active: RwLock::new(None),
            network,
            record_path: None,
        }
    }

    /// Records every activation in the [`ActiveRecord`] at `path`.
    #[must_use]
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// The worker currently in control, if any.
    pub async fn active(&self) -> Option<Arc<OfflineWorker<S, N>>> {
        self.active.read().await.clone()
    }

    /// The version recorded by the last activation, from this run or an
    /// earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    pub async fn recorded(&self) -> Result<Option<ActiveRecord>> {
        match &self.record_path {
            Some(path) => ActiveRecord::load(path).await,
            None => Ok(None),
        }
    }

    /// Brings back a version from the bucket an earlier run left behind,
    /// without touching the network. Nothing happens if a version is
    /// already active or the bucket is missing any manifest entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be read or activation fails.
    pub async fn restore(
        &self,
        worker: OfflineWorker<S, N>,
    ) -> Result<Option<Arc<OfflineWorker<S, N>>>> {
        if self.active().await.is_some() || !worker.restore().await? {
            return Ok(None);
        }
        let worker = Arc::new(worker);
        self.promote(&worker).await?;
        Ok(Some(worker))
    }

    /// Installs `worker` and, if that succeeds, activates it and makes it
    /// the active version. The replaced version is retired first and its
    /// pending cache writes are allowed to land before eviction starts.
    ///
    /// # Errors
    ///
    /// Returns the install error. The previously active version, if any,
    /// stays in control.
    pub async fn update(&self, worker: OfflineWorker<S, N>) -> Result<Arc<OfflineWorker<S, N>>> {
        if let Err(e) = worker.install().await {
            if let Some(current) = self.active().await {
                log::warn!(
                    "Update to {} failed, {} stays active",
                    worker.cache_name(),
                    current.cache_name()
                );
            }
            return Err(e);
        }

        let worker = Arc::new(worker);
        self.promote(&worker).await?;
        Ok(worker)
    }

    async fn promote(&self, worker: &Arc<OfflineWorker<S, N>>) -> Result<()> {
        let previous = self.active().await;
        if let Some(previous) = &previous {
            previous.retire();
            previous.settle().await;
        }

        let report = worker.activate().await?;
        *self.active.write().await = Some(Arc::clone(worker));
        if let Some(previous) = previous {
            log::info!("{} replaced by {}", previous.cache_name(), worker.cache_name());
        }
        log::info!(
            "Activated {} (evicted {}, claimed {} clients)",
            worker.cache_name(),
            report.deleted.len(),
            report.claimed
        );

        if let Some(path) = &self.record_path
            && let Err(e) = ActiveRecord::of(worker).save(path).await
        {
            log::warn!("Cannot record active version in {}: {e}", path.display());
        }
        Ok(())
    }

    /// Answers a request through the active worker, or straight from the
    /// network when no worker is ready to intercept or the worker passes it
    /// through.
    pub async fn handle_fetch(&self, request: &Request) -> Response {
        let intercepting = self
            .active()
            .await
            .filter(|worker| worker.state().can_intercept_fetch());
        let Some(worker) = intercepting else {
            return self.network.fetch(request).await.unwrap_or_else(|e| {
                log::warn!("Fetch of {} failed with no active worker: {e}", request.url);
                bad_gateway(&e)
            });
        };
        match worker.handle_fetch(request).await {
            FetchOutcome::Respond { response, .. } => response,
            FetchOutcome::Passthrough => worker.passthrough(request).await,
        }
    }

    /// Delivers a sync event to the active worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport> {
        match self.active().await {
            Some(worker) => worker.handle_sync(tag).await,
            None => Ok(SyncReport::default()),
        }
    }

    /// Submits a form payload through the active worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveWorker`] before the first activation, and
    /// otherwise whatever [`OfflineWorker::submit_or_queue`] returns.
    pub async fn submit_or_queue(&self, payload: serde_json::Value) -> Result<SubmitOutcome> {
        let worker = self.active().await.ok_or(Error::NoActiveWorker)?;
        worker.submit_or_queue(payload).await
    }
}
