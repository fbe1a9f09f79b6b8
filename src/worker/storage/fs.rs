use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use super::{CacheBucket, CacheStorage, validate_bucket_name};
use crate::{
    error::{Error, Result},
    worker::WorkerResponse,
};

/// Distinguishes temporary files written by concurrent `put`s
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Buckets persisted as directories under a root folder.
///
/// Each entry is a body file plus a `<md5(key)>.toml` metadata file that
/// names the body file. The metadata file is renamed into place last, so a
/// readable metadata file always points at a complete body.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug)]
pub struct FsBucket {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize, Debug)]
struct EntryMeta {
    key: String,
    status: u16,
    body: String,
    cached_at: String,
    #[serde(default)]
    headers: Vec<HeaderEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
struct HeaderEntry {
    name: String,
    value: String,
}

#[async_trait]
impl CacheStorage for FsStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        validate_bucket_name(name)?;
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(FsBucket { dir }))
    }

    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn CacheBucket>>> {
        if !self.has(name).await? {
            return Ok(None);
        }
        Ok(Some(Arc::new(FsBucket {
            dir: self.root.join(name),
        })))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        validate_bucket_name(name)?;
        match fs::metadata(self.root.join(name)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = vec![];
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        validate_bucket_name(name)?;
        match fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl FsBucket {
    fn stem(key: &str) -> String {
        format!("{:x}", md5::compute(key.as_bytes()))
    }

    fn meta_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.toml"))
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(toml::from_str(&content)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl CacheBucket for FsBucket {
    async fn get(&self, key: &str) -> Result<Option<WorkerResponse>> {
        let stem = Self::stem(key);
        let Some(meta) = Self::read_meta(&self.meta_path(&stem)).await? else {
            return Ok(None);
        };
        if meta.key != key {
            warn!("cache entry {stem} belongs to {}, not {key}", meta.key);
            return Ok(None);
        }

        let body = match fs::read(self.dir.join(&meta.body)).await {
            Ok(body) => Bytes::from(body),
            // replaced by a concurrent put between reading meta and body
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let status = StatusCode::from_u16(meta.status)
            .map_err(|err| Error::Storage(format!("invalid status in {stem}: {err}")))?;
        let mut headers = HeaderMap::new();
        for header in meta.headers {
            headers.append(
                HeaderName::from_bytes(header.name.as_bytes())?,
                HeaderValue::from_str(&header.value)?,
            );
        }

        Ok(Some(WorkerResponse {
            status,
            headers,
            body,
        }))
    }

    async fn put(&self, key: &str, response: WorkerResponse) -> Result<()> {
        let stem = Self::stem(key);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tag = format!("{}-{seq}", std::process::id());

        let body_name = format!("{stem}-{tag}.body");
        fs::write(self.dir.join(&body_name), &response.body).await?;

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(value) => Some(HeaderEntry {
                    name: name.to_string(),
                    value: value.to_string(),
                }),
                Err(_) => {
                    warn!("skip non-utf8 header {name} for {key}");
                    None
                }
            })
            .collect();
        let meta = EntryMeta {
            key: key.to_string(),
            status: response.status.as_u16(),
            body: body_name,
            cached_at: Utc::now().to_rfc3339(),
            headers,
        };

        let meta_path = self.meta_path(&stem);
        let previous = Self::read_meta(&meta_path).await.ok().flatten();

        let tmp_path = self.dir.join(format!("{stem}-{tag}.tmp"));
        fs::write(&tmp_path, toml::to_string(&meta)?).await?;
        fs::rename(&tmp_path, &meta_path).await?;

        if let Some(previous) = previous
            && previous.body != meta.body
            && let Err(err) = fs::remove_file(self.dir.join(&previous.body)).await
        {
            debug!("remove stale body {} failed: {err}", previous.body);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = vec![];
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            if let Some(meta) = Self::read_meta(&path).await? {
                keys.push(meta.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
