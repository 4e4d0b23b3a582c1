//! The HTTP boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, HOST, HeaderMap, TRANSFER_ENCODING};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::scope::Scope;

/// Abstraction over the network for testability.
///
/// An `Err` means no response was received at all (offline, DNS failure,
/// connection reset). An HTTP error status is still an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    scope: Scope,
}

impl HttpNetwork {
    /// Builds a client from the network configuration. `scope` decides the
    /// kind assigned to each response.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &NetworkConfig, scope: Scope) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            scope,
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let sent = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = sent.status();
        let headers = sent.headers().clone();
        let kind = self.scope.response_kind(sent.url());
        let body = sent
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Response {
            status,
            headers,
            body,
            kind,
        })
    }
}

/// Drops headers that describe the incoming hop rather than the request.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
        out.remove(name);
    }
    out
}
