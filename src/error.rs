use std::io;

use http::{
    header::{InvalidHeaderName, InvalidHeaderValue},
    uri::InvalidUri,
};

#[allow(clippy::enum_variant_names)]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // from
    #[error("failed io {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode toml {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to encode toml {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("failed to handle http {0}")]
    Http(#[from] http::Error),
    #[error("failed to convert url {0}")]
    InvalidUri(#[from] InvalidUri),
    #[error("invalid header name {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),
    #[error("invalid header value {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("network request failed {0}")]
    Network(#[from] reqwest::Error),

    // worker
    #[error("invalid response from fetch")]
    InvalidResponse,
    #[error("failed to install asset {path}: {reason}")]
    Install { path: String, reason: String },
    #[error("invalid worker state: {0}")]
    Lifecycle(String),
    #[error("cache storage error: {0}")]
    Storage(String),
    #[error("invalid config: {0}")]
    Config(String),

    #[error("internal server error {0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = anyhow::Result<T, E>;
