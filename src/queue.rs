//! Pending contact-form submissions awaiting a sync opportunity.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Key prefix identifying queued contact-form payloads.
pub const SUBMISSION_KEY_PREFIX: &str = "contact-form-data";

/// A form submission made while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: Uuid,
    /// `contact-form-data/<id>`.
    pub key: String,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

impl PendingSubmission {
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            key: format!("{SUBMISSION_KEY_PREFIX}/{id}"),
            payload,
            queued_at: Utc::now(),
        }
    }
}

/// Durable, insertion-ordered queue of pending submissions.
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    /// Appends a submission and returns the stored record.
    async fn enqueue(&self, payload: serde_json::Value) -> Result<PendingSubmission>;

    /// Returns every pending submission in insertion order.
    async fn pending(&self) -> Result<Vec<PendingSubmission>>;

    /// Removes the submission with `id`. Returns false if it was not queued.
    async fn remove(&self, id: Uuid) -> Result<bool>;

    async fn len(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }
}

/// Queue held in memory only.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    records: Mutex<Vec<PendingSubmission>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionQueue for MemoryQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<PendingSubmission> {
        let record = PendingSubmission::new(payload);
        self.records.lock().await.push(record.clone());
        Ok(record)
    }

    async fn pending(&self) -> Result<Vec<PendingSubmission>> {
        Ok(self.records.lock().await.clone())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }
}

/// Queue persisted as a single JSON file.
///
/// Every mutation rewrites the file atomically (write tmp + rename) while
/// holding the queue lock, so readers see either the old or the new list.
#[derive(Debug)]
pub struct FileQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileQueue {
    /// File name used inside the state directory.
    pub const FILE_NAME: &'static str = "pending-submissions.json";

    /// Creates a queue stored at `dir/pending-submissions.json`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(Self::FILE_NAME))
    }

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<PendingSubmission>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Queue(format!("cannot parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[PendingSubmission]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionQueue for FileQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<PendingSubmission> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let record = PendingSubmission::new(payload);
        records.push(record.clone());
        self.save(&records).await?;
        Ok(record)
    }

    async fn pending(&self) -> Result<Vec<PendingSubmission>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.save(&records).await?;
        Ok(true)
    }
}
