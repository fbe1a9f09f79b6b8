use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName};
use reqwest::Client;
use tracing::{debug, warn};

use super::{WorkerRequest, WorkerResponse};
use crate::error::Result;

/// Result of a network fetch that did not fail outright.
#[derive(Debug)]
pub enum Fetched {
    Response(WorkerResponse),
    /// Something came back that cannot be used as a response
    Opaque,
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &WorkerRequest) -> Result<Fetched>;
}

/// Fetches requests from the kiosk origin server.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: String,
}

impl HttpNetwork {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url(&self, request: &WorkerRequest) -> String {
        format!("{}{}", self.origin, request.key())
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &WorkerRequest) -> Result<Fetched> {
        let url = self.url(request);
        debug!("network {} {}", request.method, url);

        let mut forward_req = self.client.request(request.method.clone(), &url);
        for (name, value) in request.headers.iter() {
            if !is_exclude_header(name) {
                forward_req = forward_req.header(name.clone(), value.clone());
            }
        }
        if !request.body.is_empty() {
            forward_req = forward_req.body(request.body.clone());
        }

        let response = forward_req.send().await?;
        let status = response.status();
        let mut headers = HeaderMap::new();
        copy_headers(response.headers(), &mut headers);

        // headers arrived but the body did not
        match response.bytes().await {
            Ok(body) => Ok(Fetched::Response(WorkerResponse {
                status,
                headers,
                body,
            })),
            Err(err) => {
                warn!("failed to read body of {url}: {err}");
                Ok(Fetched::Opaque)
            }
        }
    }
}

/// Hop-by-hop and framing headers are never forwarded in either direction.
fn is_exclude_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "proxy-authenticate"
            | "upgrade"
            | "proxy-authorization"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "content-length"
            | "accept-encoding"
    )
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if !is_exclude_header(name) {
            to.append(name.clone(), value.clone());
        }
    }
}
