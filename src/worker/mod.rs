//! Offline cache worker.
//!
//! One versioned bucket per deployment. `install` fills it from the asset
//! manifest, `activate` removes every other bucket, and `handle_fetch`
//! picks cache-first or network-first for each GET request.

use std::{fmt, sync::Arc};

use futures::future::try_join_all;
use http::Method;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::{
    consts::CACHE_PREFIX,
    error::{Error, Result},
};

pub mod manifest;
pub mod message;
pub mod network;
pub mod policy;
pub mod registration;
pub mod storage;

pub use manifest::AssetManifest;
pub use message::{WorkerRequest, WorkerResponse};
pub use network::{Fetched, HttpNetwork, Network};
pub use policy::{CacheDecision, ResponseSource, Served, classify, respond};
pub use registration::Registration;
pub use storage::{CacheBucket, CacheStorage};

/// Values fixed by the build that produced a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub version: String,
    pub manifest: AssetManifest,
}

impl WorkerConfig {
    pub fn bucket_name(version: &str) -> String {
        format!("{CACHE_PREFIX}{version}")
    }

    pub fn cache_name(&self) -> String {
        Self::bucket_name(&self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed, waiting to be activated
    Waiting,
    Activating,
    Active,
    /// Failed to install or activate, or replaced by a newer worker
    Redundant,
}

/// What the worker does with an incoming request
#[derive(Debug)]
pub enum Intercept {
    /// Not handled, the request goes to the network untouched
    PassThrough,
    Respond(Result<Served>),
}

pub struct CacheWorker {
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    state: RwLock<WorkerState>,
}

impl fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWorker")
            .field("version", &self.config.version)
            .field("assets", &self.config.manifest.len())
            .field("state", &self.state())
            .finish()
    }
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            config,
            storage,
            network,
            state: RwLock::new(WorkerState::Parsed),
        }
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn cache_name(&self) -> String {
        self.config.cache_name()
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.config.manifest
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn mark_redundant(&self) {
        *self.state.write() = WorkerState::Redundant;
        info!("worker {} is redundant", self.config.version);
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(Error::Lifecycle(format!(
                "worker {} cannot enter {to:?} from {:?}",
                self.config.version, *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn settle(&self, result: &Result<()>, ok: WorkerState) {
        let next = if result.is_ok() {
            ok
        } else {
            WorkerState::Redundant
        };
        *self.state.write() = next;
    }

    /// Open the current bucket and store every manifest asset in it.
    ///
    /// All assets are fetched before any is stored. One failed asset fails
    /// the install, leaves the bucket untouched and makes the worker
    /// redundant.
    pub async fn install(&self) -> Result<()> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;
        info!(
            "installing worker {} with {} assets",
            self.config.version,
            self.config.manifest.len()
        );

        let result = self.populate().await;
        self.settle(&result, WorkerState::Waiting);
        match &result {
            Ok(()) => info!("worker {} installed", self.config.version),
            Err(err) => error!("worker {} install failed: {err}", self.config.version),
        }
        result
    }

    /// The bucket is created only once every asset has been fetched, so a
    /// failed install never leaves a bucket `restore` could pick up.
    async fn populate(&self) -> Result<()> {
        let fetches = self.config.manifest.iter().map(|path| self.fetch_asset(path));
        let entries = try_join_all(fetches).await?;
        let bucket = self.storage.open(&self.cache_name()).await?;
        bucket.put_all(entries).await
    }

    async fn fetch_asset(&self, path: &str) -> Result<(String, WorkerResponse)> {
        let install_err = |reason: String| Error::Install {
            path: path.to_string(),
            reason,
        };

        let request = WorkerRequest::get(path)?;
        match self.network.fetch(&request).await {
            Ok(Fetched::Response(response)) if response.status.is_success() => {
                Ok((request.key(), response))
            }
            Ok(Fetched::Response(response)) => Err(install_err(format!(
                "unexpected status {}",
                response.status
            ))),
            Ok(Fetched::Opaque) => Err(install_err(Error::InvalidResponse.to_string())),
            Err(err) => Err(install_err(err.to_string())),
        }
    }

    /// Delete every bucket other than the current one.
    pub async fn activate(&self) -> Result<()> {
        self.transition(WorkerState::Waiting, WorkerState::Activating)?;

        let result = self.prune().await;
        self.settle(&result, WorkerState::Active);
        match &result {
            Ok(()) => info!("worker {} activated", self.config.version),
            Err(err) => error!("worker {} activate failed: {err}", self.config.version),
        }
        result
    }

    async fn prune(&self) -> Result<()> {
        let current = self.cache_name();
        for name in self.storage.keys().await? {
            if name != current && self.storage.delete(&name).await? {
                info!("deleted stale cache {name}");
            }
        }
        Ok(())
    }

    /// Take over a bucket left by an earlier run of the same version,
    /// without fetching anything. Returns `false` when no such bucket
    /// exists, the worker then stays `Parsed`.
    pub async fn restore(&self) -> Result<bool> {
        if self.state() != WorkerState::Parsed {
            return Err(Error::Lifecycle(format!(
                "worker {} cannot be restored from {:?}",
                self.config.version,
                self.state()
            )));
        }
        if !self.storage.has(&self.cache_name()).await? {
            return Ok(false);
        }
        self.transition(WorkerState::Parsed, WorkerState::Active)?;
        info!("worker {} restored from existing cache", self.config.version);
        Ok(true)
    }

    /// Intercept a request. Only GET requests reaching an active worker
    /// are answered by the worker.
    pub async fn handle_fetch(&self, request: &WorkerRequest) -> Intercept {
        if request.method != Method::GET || self.state() != WorkerState::Active {
            return Intercept::PassThrough;
        }
        Intercept::Respond(self.respond(request).await)
    }

    /// A bucket removed by a newer worker's activation stays removed, the
    /// request is then answered from the network without storing.
    async fn respond(&self, request: &WorkerRequest) -> Result<Served> {
        let decision = classify(request, &self.config.manifest);
        let name = self.cache_name();
        let bucket = match self.storage.lookup(&name).await {
            Ok(bucket) => bucket,
            Err(err) => {
                warn!("open cache {name} failed: {err}");
                None
            }
        };
        respond(request, decision, bucket, self.network.as_ref()).await
    }
}
