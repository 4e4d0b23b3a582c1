//! Worker statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the fetch and sync handlers.
#[derive(Debug, Default)]
pub struct WorkerStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_errors: AtomicU64,
    runtime_stores: AtomicU64,
    fallbacks: AtomicU64,
    passthrough: AtomicU64,
    submissions_queued: AtomicU64,
    submissions_delivered: AtomicU64,
}

/// A point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub network_errors: u64,
    pub runtime_stores: u64,
    pub fallbacks: u64,
    pub passthrough: u64,
    pub submissions_queued: u64,
    pub submissions_delivered: u64,
}

impl StatsSnapshot {
    /// Share of intercepted GETs answered from cache, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 * 100.0 / total as f64
        }
    }
}

impl WorkerStats {
    /// Creates a new set of zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request answered from the current bucket.
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an intercepted GET the bucket could not answer.
    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fetch that got no response at all.
    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a network response added to the bucket at runtime.
    pub fn record_runtime_store(&self) {
        self.runtime_stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request answered by the offline fallback ladder.
    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request forwarded without interception.
    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a submission queued for a later sync.
    pub fn record_queued(&self) {
        self.submissions_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a queued submission accepted by the server.
    pub fn record_delivered(&self) {
        self.submissions_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            runtime_stores: self.runtime_stores.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            submissions_queued: self.submissions_queued.load(Ordering::Relaxed),
            submissions_delivered: self.submissions_delivered.load(Ordering::Relaxed),
        }
    }
}
