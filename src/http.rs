//! Request and response values passed between the host, the worker and the
//! network.
//!
//! Bodies are [`Bytes`], so cloning a [`Response`] shares the buffer rather
//! than consuming it. The fetch interceptor relies on this to hand one copy
//! to the cache and the other to the caller.

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// The user navigated to a document.
    Navigate,
    /// A subresource fetch (script, style, image, XHR).
    #[default]
    Subresource,
}

/// A request as seen by the fetch interceptor.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    /// Creates a GET subresource request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::Subresource,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a GET navigation request.
    #[must_use]
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Creates a POST request carrying a JSON body.
    #[must_use]
    pub fn post_json(url: Url, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            url,
            mode: RequestMode::Subresource,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The cache identity of this request. Only GET requests are cached,
    /// so the URL alone identifies the entry.
    #[must_use]
    pub fn cache_key(&self) -> &Url {
        &self.url
    }
}

/// Where a response came from, in the fetch API's terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ResponseKind {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response the page is allowed to read.
    Cors,
    /// Cross-origin response with hidden status and body.
    Opaque,
    /// An unfollowed redirect.
    OpaqueRedirect,
    /// A network error surfaced as a response.
    Error,
}

/// A response produced by the cache, the network or a fallback.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl Response {
    /// Creates a basic response with the given status and body.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    /// Sets the `Content-Type` header.
    #[must_use]
    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns true for any 2xx status.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if this response may be written to the runtime cache:
    /// a plain 200 that is readable by the page.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && matches!(self.kind, ResponseKind::Basic | ResponseKind::Cors)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}
