use std::{sync::mpsc, thread, time::Duration};

use anyhow::Result;
use serial_test::serial;

use kiosk_cache::utils::start_config_watcher;

mod common;
use common::*;

fn config(version: &str) -> TestConfig<'_> {
    TestConfig {
        version,
        origin: "http://127.0.0.1:9".to_string(),
        manifest: vec!["/"],
        cache_dir: None,
    }
}

#[test]
#[serial]
fn test_watcher_reloads_changed_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), &config("v1"))?;

    let (tx, rx) = mpsc::channel();
    let stop_tx = start_config_watcher(&path, move |result| {
        let _ = tx.send(result.map(|settings| settings.worker.version));
    })?;

    thread::sleep(Duration::from_millis(200));
    write_config(dir.path(), &config("v2"))?;

    let version = rx.recv_timeout(Duration::from_secs(5))??;
    assert_eq!(version, "v2");

    stop_tx.send(())?;
    Ok(())
}

#[test]
#[serial]
fn test_watcher_reports_invalid_config() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(dir.path(), &config("v1"))?;

    let (tx, rx) = mpsc::channel();
    let stop_tx = start_config_watcher(&path, move |result| {
        let _ = tx.send(result.is_ok());
    })?;

    thread::sleep(Duration::from_millis(200));
    std::fs::write(&path, "[worker]\nversion = \"\"\n")?;

    assert!(!rx.recv_timeout(Duration::from_secs(5))?);

    stop_tx.send(())?;
    Ok(())
}
