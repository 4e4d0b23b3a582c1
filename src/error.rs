//! Error types for the offline-cache library.

use thiserror::Error;

use crate::lifecycle::WorkerState;

/// Errors that can occur while running the offline cache worker.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during cache or queue persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A URL in the configuration or a request could not be parsed.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A precache asset could not be fetched or stored.
    #[error("Precache failed for {url}: {reason}")]
    Precache {
        /// The asset that failed.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// Cache storage operation failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Submission queue operation failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// The submission endpoint answered with a non-success status.
    #[error("Submission rejected by {url}: HTTP {status}")]
    Rejected {
        /// Endpoint that rejected the submission.
        url: String,
        /// Status it answered with.
        status: u16,
    },

    /// The network could not produce a response (offline, DNS, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// A lifecycle event arrived while the worker was in the wrong state.
    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        /// States the operation accepts.
        expected: &'static str,
        /// State the worker was in.
        actual: WorkerState,
    },

    /// No worker version has been installed and activated yet.
    #[error("No active worker")]
    NoActiveWorker,

    /// Configuration is structurally invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The host platform rejected a callback (notification, window, claim).
    #[error("Host error: {0}")]
    Host(String),
}

impl Error {
    /// Returns true if this error means the network was unreachable rather
    /// than that the server answered.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_))
    }
}

/// A specialized `Result` type for offline-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
