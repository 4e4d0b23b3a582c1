//! Cache-first fetch interception with an offline fallback ladder.

use std::sync::Arc;

use reqwest::{Method, StatusCode, Url};

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::http::{Request, Response, ResponseKind};
use crate::network::Network;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The current bucket had the exact request.
    Cache,
    /// Fetched from the network on a cache miss.
    Network,
    /// A cached page served because the network failed.
    Fallback,
    /// Generated locally because nothing better was available.
    Synthesized,
}

/// What the interceptor decided for one request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the host should go straight to the network.
    Passthrough,
    /// Answer the request with `response`.
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    const fn respond(response: Response, source: ResponseSource) -> Self {
        Self::Respond { response, source }
    }

    /// The response, unless the request was passed through.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Passthrough => None,
            Self::Respond { response, .. } => Some(response),
        }
    }

    #[must_use]
    pub const fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Passthrough => None,
            Self::Respond { source, .. } => Some(*source),
        }
    }
}

/// The response given in place of a network error on a request nothing
/// intercepted.
pub(crate) fn bad_gateway(error: &Error) -> Response {
    Response::new(StatusCode::BAD_GATEWAY, format!("Upstream unavailable: {error}"))
        .with_content_type("text/plain; charset=utf-8")
        .with_kind(ResponseKind::Error)
}

impl<S: CacheStorage + 'static, N: Network + 'static> OfflineWorker<S, N> {
    /// Intercepts one request.
    ///
    /// Non-GET requests and URLs outside the scope pass through. Otherwise
    /// the current bucket answers if it can; on a miss the network does,
    /// and a cacheable result is stored in the background. When the network
    /// fails, navigations get the offline page, then the cached root, then a
    /// generated page, and everything else gets a 503.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET {
            log::debug!("Passing through {} {}", request.method, request.url);
            return FetchOutcome::Passthrough;
        }
        if !self.scope.contains(&request.url) {
            log::debug!("Passing through out-of-scope {}", request.url);
            return FetchOutcome::Passthrough;
        }

        if let Some(cached) = self.lookup(request.cache_key()).await {
            log::debug!("Serving from cache: {}", request.url);
            self.stats.record_hit();
            return FetchOutcome::respond(cached, ResponseSource::Cache);
        }
        self.stats.record_miss();

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable()
                    && self.policy.matches(&request.url)
                    && !self.state().is_terminal()
                {
                    self.store_in_background(request.url.clone(), response.clone());
                }
                FetchOutcome::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                log::debug!("Network failed for {}: {e}", request.url);
                self.stats.record_network_error();
                self.offline_response(request).await
            }
        }
    }

    /// Forwards a request the interceptor passed through. A network failure
    /// becomes a 502 instead of an error.
    pub async fn passthrough(&self, request: &Request) -> Response {
        self.stats.record_passthrough();
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Passthrough to {} failed: {e}", request.url);
                self.stats.record_network_error();
                bad_gateway(&e)
            }
        }
    }

    /// Reads `url` from the current bucket. Read errors count as a miss.
    async fn lookup(&self, url: &Url) -> Option<Response> {
        let found: Result<Option<Response>> = async {
            match self.storage.get(&self.cache_name).await? {
                Some(bucket) => bucket.match_url(url).await,
                None => Ok(None),
            }
        }
        .await;
        found.unwrap_or_else(|e| {
            log::warn!("Cache read for {url} failed: {e}");
            None
        })
    }

    /// Stores a runtime response without delaying the caller. The write is
    /// dropped if this version has been retired or its bucket is gone, so a
    /// late response never brings an evicted bucket back.
    fn store_in_background(&self, url: Url, response: Response) {
        let storage = Arc::clone(&self.storage);
        let stats = Arc::clone(&self.stats);
        let lifecycle = Arc::clone(&self.lifecycle);
        let cache_name = self.cache_name.clone();
        self.background.spawn(async move {
            let stored: Result<bool> = async {
                if lifecycle.state().is_terminal() {
                    return Ok(false);
                }
                let Some(bucket) = storage.get(&cache_name).await? else {
                    return Ok(false);
                };
                bucket.put(&url, &response).await?;
                Ok(true)
            }
            .await;
            match stored {
                Ok(true) => {
                    log::debug!("Caching new asset: {url}");
                    stats.record_runtime_store();
                }
                Ok(false) => log::debug!("Dropping late store of {url}, {cache_name} is retired"),
                Err(e) => log::warn!("Failed to cache {url}: {e}"),
            }
        });
    }

    async fn offline_response(&self, request: &Request) -> FetchOutcome {
        self.stats.record_fallback();
        if !request.is_navigation() {
            return FetchOutcome::respond(
                Response::new(StatusCode::SERVICE_UNAVAILABLE, "Content not available offline")
                    .with_content_type("text/plain; charset=utf-8"),
                ResponseSource::Synthesized,
            );
        }

        for fallback in [&self.offline_url, &self.root_url] {
            if let Some(page) = self.lookup(fallback).await {
                log::debug!("Serving {fallback} for offline navigation to {}", request.url);
                return FetchOutcome::respond(page, ResponseSource::Fallback);
            }
        }

        FetchOutcome::respond(
            Response::new(StatusCode::OK, format!("Offline - {}", self.config.site_name))
                .with_content_type("text/html; charset=utf-8"),
            ResponseSource::Synthesized,
        )
    }
}
