use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheBucket, CacheStorage, validate_bucket_name};
use crate::{error::Result, worker::WorkerResponse};

/// Process-local buckets, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: DashMap<String, Arc<MemoryBucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct MemoryBucket {
    entries: DashMap<String, WorkerResponse>,
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        validate_bucket_name(name)?;
        let bucket: Arc<dyn CacheBucket> =
            self.buckets.entry(name.to_string()).or_default().clone();
        Ok(bucket)
    }

    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>> {
        Ok(self
            .buckets
            .get(name)
            .map(|bucket| bucket.value().clone() as Arc<dyn CacheBucket>))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.remove(name).is_some())
    }
}

#[async_trait]
impl CacheBucket for MemoryBucket {
    async fn get(&self, key: &str) -> Result<Option<WorkerResponse>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, response: WorkerResponse) -> Result<()> {
        self.entries.insert(key.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(String, WorkerResponse)>) -> Result<()> {
        for (key, response) in entries {
            self.entries.insert(key, response);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}
