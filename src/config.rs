use std::fs;

use http::Uri;
use serde::Deserialize;

use crate::{
    consts::{fetch_timeout, log_folder, log_level, process_timeout},
    error::{Error, Result},
    worker::{AssetManifest, WorkerConfig, storage::validate_bucket_name},
};

/// Deployment the worker serves
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SettingWorker {
    /// Deployment version, the current bucket is `cache-<version>`
    pub version: String,
    /// Origin the network primitive fetches from, e.g. `http://127.0.0.1:3000`
    pub origin: String,
    /// Build output paths inserted into the bucket on install
    #[serde(default)]
    pub manifest: Vec<String>,
    /// Extra manifest entries, one path per line
    pub manifest_file: Option<String>,
    /// Persist buckets under this folder, memory only when absent
    pub cache_dir: Option<String>,
    /// Network fetch timeout in seconds
    #[serde(default = "fetch_timeout")]
    pub fetch_timeout: u16,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SettingHost {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    /// Certificate and key file path when ssl is enabled
    pub certificate: Option<String>,
    pub certificate_key: Option<String>,
    /// Timeout for processing a single request
    #[serde(default = "process_timeout")]
    pub timeout: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "log_level")]
    pub log_level: String,
    #[serde(default = "log_folder")]
    pub log_folder: String,
    pub worker: SettingWorker,
    pub host: Vec<SettingHost>,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self> {
        let file = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&file)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let worker = &self.worker;
        if worker.version.trim().is_empty() {
            return Err(Error::Config("worker.version must not be empty".into()));
        }
        validate_bucket_name(&worker.cache_name())?;

        let origin: Uri = worker.origin.parse()?;
        if origin.scheme().is_none() || origin.authority().is_none() {
            return Err(Error::Config(format!(
                "worker.origin must be an absolute url, got {}",
                worker.origin
            )));
        }

        if self.host.is_empty() {
            return Err(Error::Config("at least one [[host]] is required".into()));
        }
        for host in &self.host {
            if host.ssl && (host.certificate.is_none() || host.certificate_key.is_none()) {
                return Err(Error::Config(format!(
                    "host {}:{} enables ssl without certificate or certificate_key",
                    host.ip, host.port
                )));
            }
        }
        Ok(())
    }
}

impl SettingWorker {
    pub fn cache_name(&self) -> String {
        WorkerConfig::bucket_name(&self.version)
    }

    /// Collect manifest entries from the config list and the optional manifest file
    pub fn asset_manifest(&self) -> Result<AssetManifest> {
        let mut paths = self.manifest.clone();
        if let Some(file) = &self.manifest_file {
            let content = fs::read_to_string(file)?;
            paths.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        Ok(AssetManifest::new(paths))
    }

    pub fn worker_config(&self) -> Result<WorkerConfig> {
        Ok(WorkerConfig {
            version: self.version.clone(),
            manifest: self.asset_manifest()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_settings_defaults() {
        let file = write_config(
            r#"
            [worker]
            version = "v1"
            origin = "http://127.0.0.1:3000"

            [[host]]
            ip = "127.0.0.1"
            port = 8080
            "#,
        );
        let settings = Settings::new(file.path().to_str().unwrap()).unwrap();

        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.log_folder, "./logs");
        assert_eq!(settings.worker.fetch_timeout, 30);
        assert!(settings.worker.manifest.is_empty());
        assert!(settings.worker.cache_dir.is_none());
        assert_eq!(settings.worker.cache_name(), "cache-v1");
        assert_eq!(settings.host[0].timeout, 75);
        assert!(!settings.host[0].ssl);
    }

    #[test]
    fn test_manifest_file_is_merged() {
        let manifest = write_config("# build output\n/_app/start.js\n\n/favicon.png\n");
        let file = write_config(&format!(
            r#"
            [worker]
            version = "v2"
            origin = "http://127.0.0.1:3000"
            manifest = ["/", "/favicon.png"]
            manifest_file = "{}"

            [[host]]
            ip = "127.0.0.1"
            port = 8080
            "#,
            manifest.path().display()
        ));
        let settings = Settings::new(file.path().to_str().unwrap()).unwrap();
        let manifest = settings.worker.asset_manifest().unwrap();

        let paths: Vec<&str> = manifest.iter().collect();
        assert_eq!(paths, vec!["/", "/favicon.png", "/_app/start.js"]);
    }

    #[test]
    fn test_empty_version_rejected() {
        let file = write_config(
            r#"
            [worker]
            version = " "
            origin = "http://127.0.0.1:3000"

            [[host]]
            ip = "127.0.0.1"
            port = 8080
            "#,
        );
        let result = Settings::new(file.path().to_str().unwrap());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_version_with_separator_rejected() {
        let file = write_config(
            r#"
            [worker]
            version = "../v1"
            origin = "http://127.0.0.1:3000"

            [[host]]
            ip = "127.0.0.1"
            port = 8080
            "#,
        );
        assert!(Settings::new(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_relative_origin_rejected() {
        let file = write_config(
            r#"
            [worker]
            version = "v1"
            origin = "/app"

            [[host]]
            ip = "127.0.0.1"
            port = 8080
            "#,
        );
        assert!(Settings::new(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_ssl_requires_certificate() {
        let file = write_config(
            r#"
            [worker]
            version = "v1"
            origin = "http://127.0.0.1:3000"

            [[host]]
            ip = "127.0.0.1"
            port = 443
            ssl = true
            "#,
        );
        let result = Settings::new(file.path().to_str().unwrap());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
