use std::{net::SocketAddr, sync::Arc, sync::mpsc, time::Duration};

use axum_server::Handle;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::{SettingWorker, Settings},
    consts::{ARCH, COMMIT, COMPILER, NAME, OS, VERSION},
    error::Result,
    http::{shutdown_servers, start_servers},
    worker::{
        CacheStorage, CacheWorker, HttpNetwork, Network, Registration,
        storage::{FsStorage, MemoryStorage},
    },
};

/// 启动信息
pub fn log_banner(settings: &Settings) {
    info!("{} v{} ({})", NAME, VERSION, COMMIT);
    info!("Compiler: {}", COMPILER);
    info!("OS: {} {}", OS, ARCH);
    debug!("Configuration: {:?}", settings);
}

/// Running servers plus the worker registration they share
pub struct Application {
    registration: Arc<Registration>,
    storage: Arc<dyn CacheStorage>,
    settings: Mutex<Settings>,
    handles: Mutex<Vec<Handle<SocketAddr>>>,
}

impl Application {
    pub async fn new(settings: Settings) -> Result<Arc<Self>> {
        let storage = open_storage(&settings.worker).await?;
        let network = build_network(&settings.worker)?;
        Ok(Arc::new(Self {
            registration: Arc::new(Registration::new(network)),
            storage,
            settings: Mutex::new(settings),
            handles: Mutex::new(vec![]),
        }))
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    fn build_worker(&self, settings: &SettingWorker) -> Result<CacheWorker> {
        Ok(CacheWorker::new(
            settings.worker_config()?,
            self.storage.clone(),
            build_network(settings)?,
        ))
    }

    /// Install and activate a worker for the given deployment
    pub async fn deploy_worker(&self, settings: &SettingWorker) -> Result<()> {
        let worker = self.build_worker(settings)?;
        self.registration.deploy(worker).await?;
        Ok(())
    }

    /// First deployment after start.
    ///
    /// When the origin cannot be reached, a bucket persisted by an earlier
    /// run of the same version is put back into service.
    pub async fn deploy_initial(&self) -> Result<()> {
        let settings = self.settings.lock().await.worker.clone();
        let Err(err) = self.deploy_worker(&settings).await else {
            return Ok(());
        };

        warn!("install of worker {} failed, trying persisted cache", settings.version);
        if self.registration.restore(self.build_worker(&settings)?).await? {
            return Ok(());
        }
        Err(err)
    }

    pub async fn start(&self) {
        let hosts = self.settings.lock().await.host.clone();
        let new_handles = start_servers(hosts, self.registration.clone()).await;
        *self.handles.lock().await = new_handles;
    }

    /// Local addresses of the running servers
    pub async fn listening(&self) -> Vec<SocketAddr> {
        let handles = self.handles.lock().await.clone();
        let mut addrs = vec![];
        for handle in handles {
            if let Some(addr) = handle.listening().await {
                addrs.push(addr);
            }
        }
        addrs
    }

    /// 处理配置文件变更
    ///
    /// A changed `[worker]` section deploys a new worker, a changed host
    /// list restarts the servers. Anything else only updates the stored
    /// settings. A `[worker]` section whose deploy failed is not recorded,
    /// so saving the same file again retries it.
    pub async fn handle_config_change(&self, result: Result<Settings>) {
        let mut new_settings = match result {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to reload config file: {:?}", e);
                return;
            }
        };
        info!("Config file reloaded successfully");

        let mut current = self.settings.lock().await;
        if new_settings.worker != current.worker {
            if new_settings.worker.cache_dir != current.worker.cache_dir {
                warn!("worker.cache_dir changes take effect after restart");
            }
            match build_network(&new_settings.worker) {
                Ok(network) => self.registration.set_network(network),
                Err(err) => error!("Failed to build network for new origin: {}", err),
            }

            info!(
                "Deploying worker {} (was {})",
                new_settings.worker.version, current.worker.version
            );
            if let Err(err) = self.deploy_worker(&new_settings.worker).await {
                error!(
                    "Failed to deploy worker {}: {}",
                    new_settings.worker.version, err
                );
                // the next change event deploys it again
                new_settings.worker = current.worker.clone();
            }
        }

        if new_settings.host != current.host {
            info!("Host config changed, restarting servers...");
            let mut handles = self.handles.lock().await;
            shutdown_servers(&mut handles).await;
            // 等待旧服务器释放端口
            tokio::time::sleep(Duration::from_millis(200)).await;
            *handles = start_servers(new_settings.host.clone(), self.registration.clone()).await;
            info!("All servers have been restarted");
        }

        *current = new_settings;
    }

    /// 优雅关闭服务器和配置监听器
    pub async fn shutdown(&self, stop_tx: Option<mpsc::Sender<()>>) {
        info!("Received shutdown signal, closing servers...");

        let mut handles = self.handles.lock().await;
        shutdown_servers(&mut handles).await;

        if let Some(stop_tx) = stop_tx
            && let Err(err) = stop_tx.send(())
        {
            error!("Failed to send stop signal to config watcher: {:?}", err);
        }

        info!("Application shutdown complete");
    }
}

async fn open_storage(settings: &SettingWorker) -> Result<Arc<dyn CacheStorage>> {
    match &settings.cache_dir {
        Some(dir) => {
            info!("Persisting cache buckets in {}", dir);
            Ok(Arc::new(FsStorage::new(dir).await?))
        }
        None => {
            info!("Keeping cache buckets in memory");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

fn build_network(settings: &SettingWorker) -> Result<Arc<dyn Network>> {
    let timeout = Duration::from_secs(settings.fetch_timeout.into());
    Ok(Arc::new(HttpNetwork::new(&settings.origin, timeout)?))
}
