//! kiosk-cache
//!
//! Offline asset cache placed in front of the kiosk web application. Exposes
//! the worker, its storage and network capabilities, and the HTTP host for
//! integration tests and embedding.

pub mod application;
pub mod cli;
pub mod config;
pub mod consts;
pub mod error;
pub mod http;
pub mod middlewares;
pub mod utils;
pub mod worker;
