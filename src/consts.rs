use std::env;

use const_format::concatcp;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const OS: &str = env::consts::OS;
pub const ARCH: &str = env::consts::ARCH;
pub const COMPILER: &str = env!("KC_COMPILER");
pub const COMMIT: &str = env!("KC_COMMIT");

/// `Server` response header value
pub const SERVER: &str = concatcp!(NAME, "/", VERSION);

/// Response header naming where a response came from
pub const CACHE_SOURCE_HEADER: &str = "x-cache-source";

/// Every cache bucket is named `cache-<version>`
pub const CACHE_PREFIX: &str = "cache-";

/// Requests under this prefix never prefer the cache
pub const API_PREFIX: &str = "/api";

/// Suffixes of binary/model assets that are always served cache-first
pub const CACHE_EXTENSIONS: [&str; 6] = [
    ".glb",
    ".wasm",
    ".onnx",
    ".tflite",
    ".min.js",
    ".json?import",
];

/// Request bodies larger than this are rejected before reaching the worker
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

// config defaults
pub const LOG_LEVEL: &str = "info";
pub fn log_level() -> String {
    LOG_LEVEL.to_string()
}

pub const LOG_FOLDER: &str = "./logs";
pub fn log_folder() -> String {
    LOG_FOLDER.to_string()
}

pub const PROCESS_TIMEOUT: u16 = 75;
pub fn process_timeout() -> u16 {
    PROCESS_TIMEOUT
}

pub const FETCH_TIMEOUT: u16 = 30;
pub fn fetch_timeout() -> u16 {
    FETCH_TIMEOUT
}
