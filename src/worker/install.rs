//! Install handler: all-or-nothing precache of the asset list.

use futures::{StreamExt, stream};
use reqwest::Url;

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::lifecycle::WorkerState;
use crate::network::Network;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    /// Number of manifest entries stored.
    pub cached: usize,
}

impl<S: CacheStorage + 'static, N: Network + 'static> OfflineWorker<S, N> {
    /// Populates this version's bucket with the precache list.
    ///
    /// Either every asset is stored or none is: on the first failure the
    /// install is abandoned, a bucket created by this attempt is removed and
    /// the worker becomes redundant. Other versions' buckets are untouched,
    /// so a previously active version keeps serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precache`] naming the asset that failed, or
    /// [`Error::InvalidState`] if this worker was already installed.
    pub async fn install(&self) -> Result<InstallReport> {
        self.lifecycle.begin_install()?;
        log::info!("Installing {}", self.cache_name);

        match self.precache().await {
            Ok(cached) => {
                log::info!("Precached {cached} assets into {}", self.cache_name);
                self.lifecycle.finish(WorkerState::Installed);
                if let Err(e) = self.host.skip_waiting().await {
                    log::warn!("skip_waiting failed: {e}");
                }
                Ok(InstallReport {
                    cache_name: self.cache_name.clone(),
                    cached,
                })
            }
            Err(e) => {
                log::error!("Error caching core assets for {}: {e}", self.cache_name);
                self.lifecycle.finish(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Adopts the bucket an earlier run of this same version left behind,
    /// without touching the network. Returns false and leaves the worker
    /// untouched unless every manifest entry is already stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if this worker has already seen a
    /// lifecycle event, or a cache error if the bucket cannot be read.
    pub async fn restore(&self) -> Result<bool> {
        if !self.precache_is_stored().await? {
            log::info!("No complete cache for {}, it needs a fresh install", self.cache_name);
            return Ok(false);
        }
        self.lifecycle.restore()?;
        log::info!("Restored {} from its existing cache", self.cache_name);
        Ok(true)
    }

    async fn precache_is_stored(&self) -> Result<bool> {
        let Some(bucket) = self.storage.get(&self.cache_name).await? else {
            return Ok(false);
        };
        for url in self.config.precache_urls()? {
            if bucket.match_url(&url).await?.is_none() {
                log::debug!("{} is missing {url}", self.cache_name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn precache(&self) -> Result<usize> {
        let urls = self.config.precache_urls()?;
        let existed = self.storage.has(&self.cache_name).await?;

        let fetched: Vec<Result<(Url, Response)>> = stream::iter(urls)
            .map(|url| async move {
                let response = self
                    .network
                    .fetch(&Request::get(url.clone()))
                    .await
                    .map_err(|e| Error::Precache {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                if !response.ok() {
                    return Err(Error::Precache {
                        url: url.to_string(),
                        reason: format!("HTTP {}", response.status),
                    });
                }
                Ok((url, response))
            })
            .buffered(self.config.precache_concurrency.max(1))
            .collect()
            .await;

        let stored: Result<usize> = async {
            let entries = fetched.into_iter().collect::<Result<Vec<_>>>()?;
            let count = entries.len();
            let bucket = self.storage.open(&self.cache_name).await?;
            bucket.put_all(entries).await?;
            Ok(count)
        }
        .await;

        if stored.is_err()
            && !existed
            && let Err(e) = self.storage.delete(&self.cache_name).await
        {
            log::warn!("Failed to remove partial cache {}: {e}", self.cache_name);
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;

    use super::super::test_support::*;
    use crate::cache::CacheStorage;
    use crate::error::Error;
    use crate::http::Response;
    use crate::lifecycle::WorkerState;

    #[tokio::test]
    async fn install_stores_every_manifest_entry() {
        let h = harness(config("v1", &["/", "/index.html"]));
        h.network.serve(&url("/").to_string(), "root");
        h.network.serve(&url("/index.html").to_string(), "index");

        let report = h.worker.install().await.unwrap();

        assert_eq!(report.cached, 2);
        assert_eq!(report.cache_name, "milewska-design-v1");
        assert_eq!(h.worker.state(), WorkerState::Installed);
        assert_eq!(h.host.skip_waiting_calls(), 1);

        let bucket = h.storage.open("milewska-design-v1").await.unwrap();
        assert_eq!(bucket.keys().await.unwrap().len(), 2);
        for path in ["/", "/index.html"] {
            assert!(bucket.match_url(&url(path)).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn install_fails_when_one_asset_is_missing() {
        let h = harness(config("v2", &["/", "/missing.js"]));
        h.network.serve(&url("/").to_string(), "root");
        h.network.route(
            reqwest::Method::GET,
            url("/missing.js").as_str(),
            Response::new(StatusCode::NOT_FOUND, "nope"),
        );

        let err = h.worker.install().await.unwrap_err();

        assert!(matches!(err, Error::Precache { ref url, .. } if url.ends_with("/missing.js")));
        assert_eq!(h.worker.state(), WorkerState::Redundant);
        assert_eq!(h.host.skip_waiting_calls(), 0);
        assert!(!h.storage.has("milewska-design-v2").await.unwrap());
    }

    #[tokio::test]
    async fn install_fails_when_network_is_down() {
        let h = harness(config("v1", &["/", "/index.html"]));
        h.network.set_offline(true);

        assert!(h.worker.install().await.is_err());
        assert!(h.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_install_leaves_other_versions_alone() {
        let storage = Arc::new(crate::cache::MemoryCacheStorage::new());
        let old = storage.open("milewska-design-v1").await.unwrap();
        old.put(&url("/"), &Response::new(StatusCode::OK, "old root"))
            .await
            .unwrap();

        let h = harness_with(
            config("v2", &["/", "/missing.js"]),
            Arc::clone(&storage),
            Arc::new(crate::testing::MockNetwork::new()),
            Arc::new(crate::testing::RecordingHost::new()),
        );
        h.network.serve(&url("/").to_string(), "new root");

        assert!(h.worker.install().await.is_err());
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["milewska-design-v1".to_string()]
        );
        let hit = old.match_url(&url("/")).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"old root");
    }

    #[tokio::test]
    async fn install_resolves_cross_origin_assets() {
        let h = harness(config(
            "v1",
            &["/", "https://unpkg.com/aos@2.3.1/dist/aos.css"],
        ));
        h.network.serve(&url("/").to_string(), "root");
        h.network
            .serve("https://unpkg.com/aos@2.3.1/dist/aos.css", ".aos{}");

        assert_eq!(h.worker.install().await.unwrap().cached, 2);
    }

    #[tokio::test]
    async fn install_twice_is_rejected() {
        let h = harness(config("v1", &["/"]));
        h.network.serve(&url("/").to_string(), "root");
        h.worker.install().await.unwrap();
        assert!(matches!(
            h.worker.install().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn restore_adopts_a_complete_bucket_offline() {
        let storage = Arc::new(crate::cache::MemoryCacheStorage::new());
        let bucket = storage.open("milewska-design-v1").await.unwrap();
        for path in ["/", "/offline.html"] {
            bucket.put(&url(path), &Response::new(StatusCode::OK, "kept")).await.unwrap();
        }
        let h = harness_with(
            config("v1", &["/", "/offline.html"]),
            storage,
            Arc::new(crate::testing::MockNetwork::new()),
            Arc::new(crate::testing::RecordingHost::new()),
        );
        h.network.set_offline(true);

        assert!(h.worker.restore().await.unwrap());
        assert_eq!(h.worker.state(), WorkerState::Installed);
        assert_eq!(h.network.call_count(), 0);
    }

    #[tokio::test]
    async fn restore_rejects_an_incomplete_bucket() {
        let storage = Arc::new(crate::cache::MemoryCacheStorage::new());
        let bucket = storage.open("milewska-design-v1").await.unwrap();
        bucket.put(&url("/"), &Response::new(StatusCode::OK, "kept")).await.unwrap();
        let h = harness_with(
            config("v1", &["/", "/offline.html"]),
            storage,
            Arc::new(crate::testing::MockNetwork::new()),
            Arc::new(crate::testing::RecordingHost::new()),
        );

        assert!(!h.worker.restore().await.unwrap());
        assert_eq!(h.worker.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn restore_without_a_bucket_creates_nothing() {
        let h = harness(config("v1", &["/"]));
        assert!(!h.worker.restore().await.unwrap());
        assert!(h.storage.keys().await.unwrap().is_empty());
    }
}
