//! Background sync of queued contact-form submissions.

use bytes::Bytes;
use serde::Serialize;

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::queue::PendingSubmission;

/// Result of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

/// What happened to a submission handed to [`OfflineWorker::submit_or_queue`].
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The endpoint answered. The status may still be an error.
    Delivered(Response),
    /// The network was unreachable; the payload waits for the next sync.
    Queued(PendingSubmission),
}

impl<S: CacheStorage + 'static, N: Network + 'static> OfflineWorker<S, N> {
    /// Resubmits every queued submission when `tag` is the configured sync
    /// tag. Other tags are ignored.
    ///
    /// Records are sent one at a time in the order they were queued. A
    /// record is removed only after the endpoint accepts it; a rejection or
    /// network error leaves it for the next run and moves on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue itself cannot be read.
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport> {
        if tag != self.config.sync_tag {
            log::debug!("Ignoring sync event with tag {tag}");
            return Ok(SyncReport::default());
        }

        let pending = self.queue.pending().await?;
        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };

        for record in pending {
            match self.resubmit(&record.payload).await {
                Ok(_) => match self.queue.remove(record.id).await {
                    Ok(_) => {
                        log::info!("Form submission {} synced successfully", record.key);
                        self.stats.record_delivered();
                        report.delivered += 1;
                    }
                    Err(e) => log::error!("Delivered {} but could not dequeue it: {e}", record.key),
                },
                Err(e) => log::error!("Error syncing form submission {}: {e}", record.key),
            }
        }

        report.remaining = self.queue.len().await?;
        Ok(report)
    }

    /// Submits a payload now, queueing it if the network is unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the queue write
    /// fails.
    pub async fn submit_or_queue(&self, payload: serde_json::Value) -> Result<SubmitOutcome> {
        match self.post(&payload).await {
            Ok(response) => Ok(SubmitOutcome::Delivered(response)),
            Err(e) if e.is_network() => {
                log::info!("Offline, queueing submission: {e}");
                let record = self.queue.enqueue(payload).await?;
                self.stats.record_queued();
                Ok(SubmitOutcome::Queued(record))
            }
            Err(e) => Err(e),
        }
    }

    /// POSTs `payload` and fails on any non-2xx answer.
    async fn resubmit(&self, payload: &serde_json::Value) -> Result<Response> {
        let response = self.post(payload).await?;
        if !response.ok() {
            return Err(Error::Rejected {
                url: self.submit_url.to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<Response> {
        let body = Bytes::from(serde_json::to_vec(payload)?);
        self.network
            .fetch(&Request::post_json(self.submit_url.clone(), body))
            .await
    }
}
