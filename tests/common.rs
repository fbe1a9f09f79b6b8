//! 集成测试的公共辅助函数和工具
#![allow(dead_code)]

use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    extract::Request,
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{
    sync::{Notify, oneshot},
    task::JoinHandle,
};

use kiosk_cache::{
    error::Error,
    worker::{
        CacheBucket, CacheStorage, Fetched, Network, WorkerRequest, WorkerResponse,
        storage::MemoryStorage,
    },
};

/// In-process network with switchable failure modes
#[derive(Default)]
pub struct FakeNetwork {
    responses: DashMap<String, WorkerResponse>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
    offline: AtomicBool,
    opaque: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `body` with 200 for `key`
    pub fn serve(&self, key: &str, body: &str) {
        self.responses
            .insert(key.to_string(), WorkerResponse::new(StatusCode::OK, body.to_string()));
    }

    pub fn serve_status(&self, key: &str, status: StatusCode, body: &str) {
        self.responses
            .insert(key.to_string(), WorkerResponse::new(status, body.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_opaque(&self, opaque: bool) {
        self.opaque.store(opaque, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.requested.lock().clear();
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &WorkerRequest) -> kiosk_cache::error::Result<Fetched> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .push(format!("{} {}", request.method, request.key()));

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "offline",
            )));
        }
        if self.opaque.load(Ordering::SeqCst) {
            return Ok(Fetched::Opaque);
        }

        let response = self
            .responses
            .get(&request.key())
            .map(|r| r.value().clone())
            .unwrap_or_else(|| WorkerResponse::new(StatusCode::NOT_FOUND, "not found"));
        Ok(Fetched::Response(response))
    }
}

/// Memory storage that can fail lookups and pause inside `delete`
#[derive(Default)]
pub struct GatedStorage {
    inner: MemoryStorage,
    fail_lookup: AtomicBool,
    hold_delete: AtomicBool,
    deleted: Notify,
    release: Notify,
}

impl GatedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    /// The next delete removes its bucket, then waits for `release_delete`
    pub fn hold_next_delete(&self) {
        self.hold_delete.store(true, Ordering::SeqCst);
    }

    /// Resolves once the held delete has removed its bucket
    pub async fn delete_done(&self) {
        self.deleted.notified().await;
    }

    pub fn release_delete(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl CacheStorage for GatedStorage {
    async fn open(&self, name: &str) -> kiosk_cache::error::Result<Arc<dyn CacheBucket>> {
        self.inner.open(name).await
    }

    async fn lookup(
        &self,
        name: &str,
    ) -> kiosk_cache::error::Result<Option<Arc<dyn CacheBucket>>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("lookup of {name} failed")));
        }
        self.inner.lookup(name).await
    }

    async fn has(&self, name: &str) -> kiosk_cache::error::Result<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> kiosk_cache::error::Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> kiosk_cache::error::Result<bool> {
        let deleted = self.inner.delete(name).await?;
        if self.hold_delete.swap(false, Ordering::SeqCst) {
            self.deleted.notify_one();
            self.release.notified().await;
        }
        Ok(deleted)
    }
}

/// Stub kiosk origin server
pub struct Origin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    down: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Origin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Answer every request with 503 while down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Stop accepting connections, later fetches fail
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub async fn spawn_origin() -> Result<Origin> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let down = Arc::new(AtomicBool::new(false));
    let is_down = down.clone();

    let router = Router::new()
        .route("/", get(|| async { "<html><body>kiosk</body></html>" }))
        .route(
            "/_app/start.js",
            get(|| async { ([(CONTENT_TYPE, "text/javascript")], "console.log('start')") }),
        )
        .route(
            "/api/session",
            get(|| async { ([(CONTENT_TYPE, "application/json")], r#"{"user":"kiosk"}"#) })
                .post(|body: String| async move { format!("posted {body}") }),
        )
        .route("/models/avatar.glb", get(|| async { "glb-bytes" }))
        .fallback(|| async { (StatusCode::NOT_FOUND, "missing") })
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let counter = counter.clone();
            let is_down = is_down.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if is_down.load(Ordering::SeqCst) {
                    return (StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
                }
                next.run(req).await
            }
        }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });

    Ok(Origin {
        addr,
        hits,
        down,
        shutdown: Some(tx),
        task: Some(task),
    })
}

/// 测试配置
pub struct TestConfig<'a> {
    pub version: &'a str,
    pub origin: String,
    pub manifest: Vec<&'a str>,
    pub cache_dir: Option<PathBuf>,
}

/// 创建临时配置文件用于测试
pub fn write_config(dir: &Path, config: &TestConfig) -> Result<PathBuf> {
    let config_path = dir.join("config.toml");
    let mut content = String::new();
    content.push_str(&format!(
        "log_folder = \"{}\"\n\n",
        dir.join("logs").display()
    ));
    content.push_str("[worker]\n");
    content.push_str(&format!("version = \"{}\"\n", config.version));
    content.push_str(&format!("origin = \"{}\"\n", config.origin));
    content.push_str(&format!("manifest = {:?}\n", config.manifest));
    content.push_str("fetch_timeout = 5\n");
    if let Some(cache_dir) = &config.cache_dir {
        content.push_str(&format!("cache_dir = \"{}\"\n", cache_dir.display()));
    }
    content.push_str("\n[[host]]\nip = \"127.0.0.1\"\nport = 0\ntimeout = 10\n");

    std::fs::write(&config_path, content)?;
    Ok(config_path)
}
