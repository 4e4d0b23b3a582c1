//! Request classification: which URLs the worker intercepts and which
//! fetched responses it keeps.

use reqwest::Url;

use crate::config::{RuntimeCacheConfig, WorkerConfig};
use crate::error::Result;
use crate::http::ResponseKind;

/// The set of URLs a worker is responsible for.
#[derive(Debug, Clone)]
pub struct Scope {
    /// ASCII serialization of the scope's origin.
    origin: String,
    allowed_hosts: Vec<String>,
}

impl Scope {
    /// Builds the scope from the worker configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured origin does not parse.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let origin = config.origin_url()?;
        Ok(Self::new(&origin, config.cross_origin_hosts.clone()))
    }

    #[must_use]
    pub fn new(origin: &Url, allowed_hosts: Vec<String>) -> Self {
        Self {
            origin: origin.origin().ascii_serialization(),
            allowed_hosts,
        }
    }

    /// Returns true if `url` shares the worker's origin.
    #[must_use]
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin().ascii_serialization() == self.origin
    }

    /// Returns true if `url` is on an allowlisted cross-origin host.
    #[must_use]
    pub fn is_allowed_cross_origin(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.allowed_hosts.iter().any(|h| host_matches(host, h)))
    }

    /// Returns true if the worker should intercept requests to `url`.
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        self.is_same_origin(url) || self.is_allowed_cross_origin(url)
    }

    /// The response kind a successful fetch of `url` yields.
    #[must_use]
    pub fn response_kind(&self, url: &Url) -> ResponseKind {
        if self.is_same_origin(url) {
            ResponseKind::Basic
        } else if self.is_allowed_cross_origin(url) {
            ResponseKind::Cors
        } else {
            ResponseKind::Opaque
        }
    }
}

/// Decides whether a fetched resource is worth persisting at runtime.
#[derive(Debug, Clone)]
pub struct RuntimeCachePolicy {
    extensions: Vec<String>,
    hosts: Vec<String>,
    path_prefixes: Vec<String>,
}

impl From<&RuntimeCacheConfig> for RuntimeCachePolicy {
    fn from(config: &RuntimeCacheConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            hosts: config.hosts.clone(),
            path_prefixes: config.path_prefixes.clone(),
        }
    }
}

impl Default for RuntimeCachePolicy {
    fn default() -> Self {
        Self::from(&RuntimeCacheConfig::default())
    }
}

impl RuntimeCachePolicy {
    /// Returns true if a successful response for `url` should be stored.
    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        if url
            .host_str()
            .is_some_and(|host| self.hosts.iter().any(|h| host_matches(host, h)))
        {
            return true;
        }
        let path = url.path();
        if self.path_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }
        extension(path).is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }
}

/// Lowercased extension of the last path segment.
fn extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Exact host match or a subdomain of `allowed`.
fn host_matches(host: &str, allowed: &str) -> bool {
    host.eq_ignore_ascii_case(allowed)
        || host
            .len()
            .checked_sub(allowed.len() + 1)
            .is_some_and(|split| {
                host.as_bytes()[split] == b'.' && host[split + 1..].eq_ignore_ascii_case(allowed)
            })
}
