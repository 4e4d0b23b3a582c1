//! On-disk cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<digest(bucket name)>/bucket.json        bucket metadata
//! <root>/<digest(bucket name)>/entries/<digest(url)>.json
//! ```
//!
//! Every file is written to a uniquely named temporary file and renamed into
//! place, so a reader never sees a half-written entry and concurrent writers
//! of the same URL resolve to last-write-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CacheBucket, CacheStorage, StoredEntry};
use crate::error::Result;
use crate::http::Response;

const BUCKET_META: &str = "bucket.json";
const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Serialize, Deserialize)]
struct BucketMeta {
    name: String,
}

/// Cache storage persisted under a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest(name))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        let dir = self.bucket_dir(name);
        tokio::fs::create_dir_all(dir.join(ENTRIES_DIR)).await?;
        let meta_path = dir.join(BUCKET_META);
        if tokio::fs::metadata(&meta_path).await.is_err() {
            let meta = serde_json::to_vec(&BucketMeta {
                name: name.to_string(),
            })?;
            write_atomic(&meta_path, &meta).await?;
        }
        Ok(Arc::new(DiskBucket {
            name: name.to_string(),
            dir,
        }))
    }

    async fn get(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>> {
        if !self.has(name).await? {
            return Ok(None);
        }
        Ok(Some(Arc::new(DiskBucket {
            name: name.to_string(),
            dir: self.bucket_dir(name),
        })))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.bucket_dir(name).join(BUCKET_META))
            .await
            .is_ok())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.bucket_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let meta_path = entry.path().join(BUCKET_META);
            // Directories without readable metadata are half-deleted buckets.
            let Ok(bytes) = tokio::fs::read(&meta_path).await else {
                continue;
            };
            match serde_json::from_slice::<BucketMeta>(&bytes) {
                Ok(meta) => names.push(meta.name),
                Err(e) => log::warn!("Ignoring unreadable bucket {}: {e}", meta_path.display()),
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A bucket persisted as one JSON file per entry.
#[derive(Debug)]
struct DiskBucket {
    name: String,
    dir: PathBuf,
}

impl DiskBucket {
    fn entry_path(&self, url: &Url) -> PathBuf {
        self.dir
            .join(ENTRIES_DIR)
            .join(format!("{}.json", digest(url.as_str())))
    }
}

#[async_trait]
impl CacheBucket for DiskBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_url(&self, url: &Url) -> Result<Option<Response>> {
        let bytes = match tokio::fs::read(self.entry_path(url)).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = serde_json::from_slice(&bytes)?;
        entry.to_response().map(Some)
    }

    async fn put(&self, url: &Url, response: &Response) -> Result<()> {
        let bytes = serde_json::to_vec(&StoredEntry::capture(url, response))?;
        write_atomic(&self.entry_path(url), &bytes).await
    }

    async fn put_all(&self, entries: Vec<(Url, Response)>) -> Result<()> {
        // Stage everything first so a failed write leaves the bucket as it was.
        let staging = self
            .dir
            .join(format!("staging-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&staging).await?;

        let mut staged = Vec::with_capacity(entries.len());
        for (url, response) in &entries {
            let target = self.entry_path(url);
            let Some(file_name) = target.file_name() else {
                continue;
            };
            let tmp = staging.join(file_name);
            let written: Result<()> = match serde_json::to_vec(&StoredEntry::capture(url, response)) {
                Ok(bytes) => tokio::fs::write(&tmp, bytes).await.map_err(Into::into),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e);
            }
            staged.push((tmp, target));
        }

        for (tmp, target) in staged {
            tokio::fs::rename(&tmp, &target).await?;
        }
        let _ = tokio::fs::remove_dir_all(&staging).await;
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(url)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<Url>> {
        let mut read_dir = match tokio::fs::read_dir(self.dir.join(ENTRIES_DIR)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut urls = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let stored: StoredEntry = serde_json::from_slice(&bytes)?;
            urls.push(stored.parsed_url()?);
        }
        Ok(urls)
    }
}

/// Hex SHA-256 of `input`, used as a file-system-safe name.
fn digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Writes `bytes` to `path` via a unique temporary file and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
