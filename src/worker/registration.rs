use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    CacheWorker, Intercept, Network, Served, WorkerRequest, policy::pass_through,
};
use crate::error::Result;

/// Holds the worker that currently answers requests and swaps in new
/// deployments.
pub struct Registration {
    active: RwLock<Option<Arc<CacheWorker>>>,
    deploying: Mutex<()>,
    /// Used for requests while no worker is active
    network: RwLock<Arc<dyn Network>>,
}

impl Registration {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            active: RwLock::new(None),
            deploying: Mutex::new(()),
            network: RwLock::new(network),
        }
    }

    /// Replace the network used while no worker is active
    pub fn set_network(&self, network: Arc<dyn Network>) {
        *self.network.write() = network;
    }

    pub fn active(&self) -> Option<Arc<CacheWorker>> {
        self.active.read().clone()
    }

    /// Install then activate a new worker.
    ///
    /// The current worker keeps serving while the new one installs. When
    /// install or activate fails the current worker stays in place.
    pub async fn deploy(&self, worker: CacheWorker) -> Result<Arc<CacheWorker>> {
        let _deploying = self.deploying.lock().await;
        let worker = Arc::new(worker);

        worker.install().await?;
        worker.activate().await?;

        let previous = self.active.write().replace(worker.clone());
        if let Some(previous) = previous
            && !Arc::ptr_eq(&previous, &worker)
        {
            previous.mark_redundant();
        }
        info!("worker {} now controls requests", worker.version());
        Ok(worker)
    }

    /// Make a worker active on top of its persisted bucket, skipping
    /// install and activate. Returns `false` when the bucket is missing.
    pub async fn restore(&self, worker: CacheWorker) -> Result<bool> {
        let _deploying = self.deploying.lock().await;
        if !worker.restore().await? {
            return Ok(false);
        }

        let worker = Arc::new(worker);
        if let Some(previous) = self.active.write().replace(worker.clone()) {
            previous.mark_redundant();
        }
        info!("worker {} now controls requests", worker.version());
        Ok(true)
    }

    /// Route a request through the active worker.
    pub async fn handle(&self, request: &WorkerRequest) -> Result<Served> {
        let worker = self.active();
        let network = match &worker {
            Some(worker) => match worker.handle_fetch(request).await {
                Intercept::Respond(result) => return result,
                Intercept::PassThrough => worker.network().clone(),
            },
            None => self.network.read().clone(),
        };
        pass_through(request, network.as_ref()).await
    }
}
