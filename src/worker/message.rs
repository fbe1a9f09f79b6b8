use axum::body::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, uri::PathAndQuery};

use crate::error::Result;

/// A request as seen by the worker.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub method: Method,
    pub path: String,
    /// Query string without the leading `?`, `None` when empty
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WorkerRequest {
    /// GET request for a path with optional query, e.g. `/models/face.onnx?v=2`
    pub fn get(path_and_query: &str) -> Result<Self> {
        let parsed: PathAndQuery = path_and_query.parse()?;
        Ok(Self {
            method: Method::GET,
            path: parsed.path().to_string(),
            query: non_empty(parsed.query()),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
    }

    pub fn from_parts(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: non_empty(uri.query()),
            headers,
            body,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Query string including the leading `?`, empty when there is none
    pub fn search(&self) -> String {
        self.query
            .as_deref()
            .map(|q| format!("?{q}"))
            .unwrap_or_default()
    }

    /// Identity of the request inside a cache bucket: path + search
    pub fn key(&self) -> String {
        format!("{}{}", self.path, self.search())
    }
}

fn non_empty(query: Option<&str>) -> Option<String> {
    query.filter(|q| !q.is_empty()).map(str::to_string)
}

/// A fully buffered response.
///
/// The body is read once from the network. Handing the same response to
/// the caller and to a cache bucket needs an explicit `clone()` first.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WorkerResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}
