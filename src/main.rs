use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use kiosk_cache::{
    application::{Application, log_banner},
    cli::Cli,
    config::Settings,
    utils::{init_logger, shutdown_signal, start_config_watcher},
};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = Settings::new(&args.config).with_context(|| "init config failed")?;

    let _guard = init_logger(settings.log_level.as_str(), settings.log_folder.as_str())
        .with_context(|| "init logger failed")?;
    log_banner(&settings);

    let app = Application::new(settings)
        .await
        .with_context(|| "init application failed")?;

    // 没有可用的 worker 时请求直接转发到源站
    if let Err(err) = app.deploy_initial().await {
        error!("No worker active, requests go to the origin uncached: {}", err);
    }
    app.start().await;

    let runtime = tokio::runtime::Handle::current();
    let watcher_app = app.clone();
    let stop_tx = start_config_watcher(&args.config, move |result| {
        let app = watcher_app.clone();
        runtime.spawn(async move { app.handle_config_change(result).await });
    })
    .with_context(|| "watch config file failed")?;

    info!("Server started");

    shutdown_signal().await;
    app.shutdown(Some(stop_tx)).await;

    Ok(())
}
