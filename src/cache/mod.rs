//! Named cache buckets mapping request identity to stored responses.
//!
//! [`CacheStorage`] is the set of buckets owned by an origin and
//! [`CacheBucket`] is a single bucket. Both are traits so the worker can run
//! against the in-memory backend in tests and the disk backend in the host.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{Response, ResponseKind};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// A set of named buckets.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the bucket called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>>;

    /// Returns the bucket called `name` if it exists. Never creates one.
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>>;

    /// Returns true if a bucket called `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes the bucket called `name` and everything in it. Returns false
    /// if there was no such bucket.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Lists the names of all buckets.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// One named bucket of cached responses, keyed by URL. Only GET responses
/// are stored, so the URL is the full request identity.
#[async_trait]
pub trait CacheBucket: Send + Sync {
    fn name(&self) -> &str;

    /// Looks up the stored response for `url`.
    async fn match_url(&self, url: &Url) -> Result<Option<Response>>;

    /// Stores `response` under `url`, replacing any previous entry.
    async fn put(&self, url: &Url, response: &Response) -> Result<()>;

    /// Stores every entry or none of them.
    async fn put_all(&self, entries: Vec<(Url, Response)>) -> Result<()>;

    /// Removes the entry for `url`. Returns false if there was none.
    async fn delete(&self, url: &Url) -> Result<bool>;

    /// Lists every stored URL.
    async fn keys(&self) -> Result<Vec<Url>>;
}

/// Serialized form of a cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body.
    pub body: String,
    pub kind: ResponseKind,
    pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
    /// Captures `response` for storage under `url`. Headers whose values are
    /// not valid UTF-8 are dropped.
    #[must_use]
    pub fn capture(url: &Url, response: &Response) -> Self {
        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: BASE64.encode(&response.body),
            kind: response.kind,
            stored_at: Utc::now(),
        }
    }

    /// Rebuilds the response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the entry is corrupt.
    pub fn to_response(&self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Cache(format!("bad status in entry for {}: {e}", self.url)))?;
        let body = BASE64
            .decode(&self.body)
            .map_err(|e| Error::Cache(format!("bad body in entry for {}: {e}", self.url)))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        Ok(Response {
            status,
            headers,
            body: body.into(),
            kind: self.kind,
        })
    }

    /// Parses the stored URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the entry is corrupt.
    pub fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| Error::Cache(format!("bad url {}: {e}", self.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::CONTENT_TYPE;

    #[test]
    fn stored_entry_preserves_response() {
        let url = Url::parse("https://site.test/images/x.webp").unwrap();
        let response = Response::new(StatusCode::OK, vec![0u8, 159, 146, 150])
            .with_content_type("image/webp")
            .with_kind(ResponseKind::Basic);

        let entry = StoredEntry::capture(&url, &response);
        let json = serde_json::to_string(&entry).unwrap();
        let restored: StoredEntry = serde_json::from_str(&json).unwrap();
        let back = restored.to_response().unwrap();

        assert_eq!(back.status, StatusCode::OK);
        assert_eq!(back.body, response.body);
        assert_eq!(back.headers.get(CONTENT_TYPE).unwrap(), "image/webp");
        assert_eq!(restored.parsed_url().unwrap(), url);
    }

    #[test]
    fn corrupt_body_is_a_cache_error() {
        let mut entry = StoredEntry::capture(
            &Url::parse("https://site.test/").unwrap(),
            &Response::new(StatusCode::OK, "x"),
        );
        entry.body = "***".to_string();
        assert!(matches!(entry.to_response(), Err(Error::Cache(_))));
    }
}
