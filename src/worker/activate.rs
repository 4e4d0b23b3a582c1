//! Activate handler: evicts caches left by older versions and claims
//! open clients.

use futures::future::join_all;

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::error::Result;
use crate::lifecycle::WorkerState;
use crate::network::Network;

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale buckets that were deleted.
    pub deleted: Vec<String>,
    /// Clients claimed through the host.
    pub claimed: usize,
}

/// Deletes every bucket in `storage` except `current`, concurrently.
///
/// Failures are logged and skipped. Returns the names actually deleted.
pub async fn evict_stale_caches<S: CacheStorage + ?Sized>(storage: &S, current: &str) -> Vec<String> {
    let names = match storage.keys().await {
        Ok(names) => names,
        Err(e) => {
            log::warn!("Failed to list caches: {e}");
            return Vec::new();
        }
    };

    let stale: Vec<String> = names.into_iter().filter(|name| name != current).collect();
    let results = join_all(stale.iter().map(|name| storage.delete(name))).await;

    stale
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| match result {
            Ok(true) => {
                log::info!("Deleting old cache: {name}");
                Some(name)
            }
            Ok(false) => None,
            Err(e) => {
                log::warn!("Failed to delete cache {name}: {e}");
                None
            }
        })
        .collect()
}

impl<S: CacheStorage + 'static, N: Network + 'static> OfflineWorker<S, N> {
    /// Evicts caches from previous versions and takes control of open
    /// clients.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidState`] unless the worker is installed
    /// or already active.
    pub async fn activate(&self) -> Result<ActivateReport> {
        self.lifecycle.begin_activate()?;
        log::info!("Activating {}", self.cache_name);

        let deleted = evict_stale_caches(self.storage.as_ref(), &self.cache_name).await;
        let claimed = match self.host.claim_clients().await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Failed to claim clients: {e}");
                0
            }
        };

        self.lifecycle.finish(WorkerState::Activated);
        Ok(ActivateReport { deleted, claimed })
    }
}
