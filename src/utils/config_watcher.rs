use notify::{EventKind, RecursiveMode, Watcher, event::ModifyKind};
use std::{
    path::Path,
    sync::mpsc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

use crate::{config::Settings, error::Result};

/// 启动配置文件监听
///
/// Reloads the settings once the file has been quiet for the debounce
/// period and hands the result to `callback`. The watcher runs on its own
/// thread until the returned sender is used or dropped.
pub fn start_config_watcher(
    config_path: impl AsRef<Path>,
    callback: impl Fn(Result<Settings>) + Send + 'static,
) -> Result<mpsc::Sender<()>, notify::Error> {
    let (stop_tx, stop_rx) = mpsc::channel();
    let config_path = config_path.as_ref().to_owned();

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    info!("Watching config file: {:?}", config_path);

    std::thread::spawn(move || {
        let debounce_duration = Duration::from_millis(300);
        let mut pending: Option<Instant> = None;

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Stopping config watcher");
                    break;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(event))
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) =>
                {
                    debug!("Config file event: {:?}", event.kind);

                    // editors replace the file, the old watch is gone with it
                    if matches!(
                        event.kind,
                        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
                    ) {
                        let _ = watcher.unwatch(&config_path);
                        if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive)
                        {
                            error!("Failed to re-watch config file: {:?}", e);
                        }
                    }
                    pending = Some(Instant::now() + debounce_duration);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Watch error: {:?}", e),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watcher channel disconnected");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }

            if pending.is_some_and(|deadline| Instant::now() >= deadline) {
                pending = None;
                info!("Config file changed: {:?}", config_path);
                match config_path.to_str() {
                    Some(path) => callback(Settings::new(path)),
                    None => error!("Config path is not valid utf-8: {:?}", config_path),
                }
            }
        }

        if let Err(e) = watcher.unwatch(&config_path) {
            debug!("Failed to unwatch config file: {:?}", e);
        }
    });

    Ok(stop_tx)
}
