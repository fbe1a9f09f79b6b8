use std::str::FromStr;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self},
    layer::SubscriberExt,
};

/// 初始化 Logger
///
/// Console output is always on. The file layer writes to `log_folder`,
/// rotated daily. Keep the returned guard alive or buffered file logs are
/// lost on exit.
pub fn init_logger(log_level: &str, log_folder: &str) -> anyhow::Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(log_folder, "kiosk_cache_log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_subscriber = fmt::layer()
        .compact()
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    let formatting_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let env_layer = EnvFilter::from_str(log_level).unwrap_or_else(|_| "info".into());

    let collector = tracing_subscriber::registry()
        .with(env_layer)
        .with(formatting_layer)
        .with(file_subscriber);
    tracing::subscriber::set_global_default(collector)
        .with_context(|| "to set a global collector")?;
    Ok(guard)
}
