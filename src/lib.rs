//! offline-cache - A versioned offline cache for a static marketing site.
//!
//! The library models a site's offline layer as a worker with an explicit
//! lifecycle: it precaches a fixed asset list on install, drops caches from
//! older versions on activate, answers fetches cache-first with an offline
//! fallback ladder, queues contact-form submissions made while offline and
//! turns push payloads into notifications.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use offline_cache::{
//!     AppConfig, DiskCacheStorage, FileQueue, HttpNetwork, NoHost, OfflineWorker, Registration,
//!     Request, Scope,
//! };
//!
//! # async fn example() -> offline_cache::Result<()> {
//! let config = AppConfig::default();
//! let network = Arc::new(HttpNetwork::new(&config.network, Scope::from_config(&config.worker)?)?);
//! let worker = OfflineWorker::new(
//!     config.worker.clone(),
//!     Arc::new(DiskCacheStorage::new(&config.paths.cache_dir)),
//!     Arc::clone(&network),
//!     Arc::new(FileQueue::in_dir(&config.paths.state_dir)),
//!     Arc::new(NoHost),
//! )?;
//!
//! // Install and activate; a failed install leaves any previous version in charge.
//! let registration = Registration::new(network);
//! registration.update(worker).await?;
//!
//! let url = config.worker.resolve("/")?;
//! let response = registration.handle_fetch(&Request::navigate(url)).await;
//! println!("{} ({} bytes)", response.status, response.body.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod push;
pub mod queue;
pub mod registration;
pub mod scope;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::{CacheBucket, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use config::{AppConfig, NetworkConfig, PushConfig, ServerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use host::{LoggingHost, NoHost, WorkerHost};
pub use http::{Request, RequestMode, Response, ResponseKind};
pub use lifecycle::WorkerState;
pub use network::{HttpNetwork, Network};
pub use push::{Notification, PushPresenter};
pub use queue::{FileQueue, MemoryQueue, PendingSubmission, SubmissionQueue};
pub use registration::{ActiveRecord, Registration};
pub use scope::{RuntimeCachePolicy, Scope};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker::{
    ActivateReport, FetchOutcome, InstallReport, OfflineWorker, ResponseSource, SubmitOutcome,
    SyncReport,
};
