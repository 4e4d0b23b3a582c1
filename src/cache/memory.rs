//! In-memory cache storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::RwLock;

use super::{CacheBucket, CacheStorage};
use crate::error::Result;
use crate::http::Response;

/// Cache storage that lives for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<HashMap<String, Arc<MemoryBucket>>>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryBucket::new(name)));
        Ok(Arc::clone(bucket) as Arc<dyn CacheBucket>)
    }

    async fn get(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(name)
            .map(|bucket| Arc::clone(bucket) as Arc<dyn CacheBucket>))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.buckets.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// A single in-memory bucket.
#[derive(Debug)]
pub struct MemoryBucket {
    name: String,
    entries: RwLock<HashMap<Url, Response>>,
}

impl MemoryBucket {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_url(&self, url: &Url) -> Result<Option<Response>> {
        Ok(self.entries.read().await.get(url).cloned())
    }

    async fn put(&self, url: &Url, response: &Response) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(url.clone(), response.clone());
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(Url, Response)>) -> Result<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<bool> {
        Ok(self.entries.write().await.remove(url).is_some())
    }

    async fn keys(&self) -> Result<Vec<Url>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn open_creates_and_reuses_bucket() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        let a = storage.open("v1").await.unwrap();
        a.put(&url("https://site.test/"), &Response::new(StatusCode::OK, "home"))
            .await
            .unwrap();

        let b = storage.open("v1").await.unwrap();
        assert_eq!(b.name(), "v1");
        assert!(b.match_url(&url("https://site.test/")).await.unwrap().is_some());
        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn get_never_creates() {
        let storage = MemoryCacheStorage::new();
        assert!(storage.get("v1").await.unwrap().is_none());
        assert!(storage.keys().await.unwrap().is_empty());

        storage.open("v1").await.unwrap();
        assert_eq!(storage.get("v1").await.unwrap().unwrap().name(), "v1");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        storage.open("v1").await.unwrap();
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_overwrites_same_key() {
        let storage = MemoryCacheStorage::new();
        let bucket = storage.open("v1").await.unwrap();
        let key = url("https://site.test/styles.css");
        bucket.put(&key, &Response::new(StatusCode::OK, "old")).await.unwrap();
        bucket.put(&key, &Response::new(StatusCode::OK, "new")).await.unwrap();

        let hit = bucket.match_url(&key).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"new");
        assert_eq!(bucket.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn entry_delete() {
        let storage = MemoryCacheStorage::new();
        let bucket = storage.open("v1").await.unwrap();
        let key = url("https://site.test/a.js");
        bucket.put(&key, &Response::new(StatusCode::OK, "a")).await.unwrap();
        assert!(bucket.delete(&key).await.unwrap());
        assert!(!bucket.delete(&key).await.unwrap());
        assert!(bucket.match_url(&key).await.unwrap().is_none());
    }
}
