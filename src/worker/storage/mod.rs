//! Named cache buckets of request -> response pairs.
//!
//! Implementations handle their own concurrency. The worker never locks
//! around bucket reads or writes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::WorkerResponse;

pub mod fs;
pub mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it when missing
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>>;

    /// Open a bucket only if it exists
    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of every existing bucket
    async fn keys(&self) -> Result<Vec<String>>;

    /// Returns `false` when the bucket did not exist
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[async_trait]
pub trait CacheBucket: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<WorkerResponse>>;

    async fn put(&self, key: &str, response: WorkerResponse) -> Result<()>;

    async fn put_all(&self, entries: Vec<(String, WorkerResponse)>) -> Result<()> {
        for (key, response) in entries {
            self.put(&key, response).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>>;
}

/// Bucket names become directory names for persistent storage
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::Storage(format!("invalid bucket name {name:?}")));
    }
    Ok(())
}
