use std::sync::Arc;

use http::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    AssetManifest, WorkerRequest, WorkerResponse,
    network::{Fetched, Network},
    storage::CacheBucket,
};
use crate::{
    consts::{API_PREFIX, CACHE_EXTENSIONS},
    error::{Error, Result},
};

/// Per-request sourcing decision, recomputed for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    pub use_cache: bool,
}

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Cache-first hit
    Cache,
    Network,
    /// Network failed, served the previously stored entry
    Fallback,
    /// Not intercepted by the worker
    PassThrough,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        use ResponseSource::*;

        match self {
            Cache => "cache",
            Network => "network",
            Fallback => "fallback",
            PassThrough => "pass-through",
        }
    }
}

#[derive(Debug)]
pub struct Served {
    pub response: WorkerResponse,
    pub source: ResponseSource,
    /// Background store of a network response
    store: Option<JoinHandle<()>>,
}

impl Served {
    pub fn new(response: WorkerResponse, source: ResponseSource) -> Self {
        Self {
            response,
            source,
            store: None,
        }
    }

    /// Wait until the response has been written to the bucket, if it is
    /// being stored at all.
    pub async fn stored(&mut self) {
        if let Some(store) = self.store.take()
            && let Err(err) = store.await
        {
            warn!("store task failed: {err}");
        }
    }
}

/// Decide whether a GET request prefers the cache.
///
/// Manifest membership is the default, `/api` paths never prefer the cache,
/// and cacheable binary/model suffixes always do, in that order.
pub fn classify(request: &WorkerRequest, manifest: &AssetManifest) -> CacheDecision {
    let mut use_cache = manifest.contains(&request.path);

    if request.path.starts_with(API_PREFIX) {
        use_cache = false;
    }

    let search = request.search();
    let key = request.key();
    let matches_extension = CACHE_EXTENSIONS.iter().any(|ext| {
        request.path.ends_with(ext) || (!search.is_empty() && search.ends_with(ext)) || key.ends_with(ext)
    });
    if matches_extension {
        use_cache = true;
    }

    CacheDecision { use_cache }
}

/// Source a response for an intercepted GET request.
///
/// Cache-first when `decision.use_cache` and the key is stored, otherwise
/// network-first with a single cache fallback when the network fails.
/// Without a bucket every lookup misses and nothing is stored. A `200`
/// from the network is stored in the background after it is returned.
pub async fn respond(
    request: &WorkerRequest,
    decision: CacheDecision,
    bucket: Option<Arc<dyn CacheBucket>>,
    network: &dyn Network,
) -> Result<Served> {
    let key = request.key();

    if decision.use_cache
        && let Some(bucket) = &bucket
    {
        match bucket.get(&key).await {
            Ok(Some(response)) => {
                debug!("CACHED {key}");
                return Ok(Served::new(response, ResponseSource::Cache));
            }
            Ok(None) => {}
            Err(err) => warn!("cache lookup for {key} failed: {err}"),
        }
    }

    debug!("FETCH {key}");
    let err = match fetch(request, network).await {
        Ok(response) => {
            let store = match &bucket {
                Some(bucket) if response.status == StatusCode::OK => {
                    Some(spawn_store(bucket.clone(), key, response.clone()))
                }
                _ => None,
            };
            return Ok(Served {
                response,
                source: ResponseSource::Network,
                store,
            });
        }
        Err(err) => err,
    };

    let Some(bucket) = bucket else {
        return Err(err);
    };
    match bucket.get(&key).await {
        Ok(Some(response)) => {
            debug!("FALLBACK {key} after {err}");
            Ok(Served::new(response, ResponseSource::Fallback))
        }
        Ok(None) => Err(err),
        Err(lookup_err) => {
            warn!("fallback lookup for {key} failed: {lookup_err}");
            Err(err)
        }
    }
}

async fn fetch(request: &WorkerRequest, network: &dyn Network) -> Result<WorkerResponse> {
    match network.fetch(request).await? {
        Fetched::Response(response) => Ok(response),
        Fetched::Opaque => Err(Error::InvalidResponse),
    }
}

fn spawn_store(
    bucket: Arc<dyn CacheBucket>,
    key: String,
    response: WorkerResponse,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = bucket.put(&key, response).await {
            warn!("failed to store {key}: {err}");
        }
    })
}

/// Forward a request the worker declined, no cache lookup or store
pub async fn pass_through(request: &WorkerRequest, network: &dyn Network) -> Result<Served> {
    let response = fetch(request, network).await?;
    Ok(Served::new(response, ResponseSource::PassThrough))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> AssetManifest {
        AssetManifest::new(["/", "/_app/start.js", "/api/manifest.json"])
    }

    fn decide(path: &str) -> bool {
        classify(&WorkerRequest::get(path).unwrap(), &manifest()).use_cache
    }

    #[test]
    fn test_manifest_paths_use_cache() {
        assert!(decide("/"));
        assert!(decide("/_app/start.js"));
        assert!(!decide("/about"));
    }

    #[test]
    fn test_manifest_match_ignores_query() {
        assert!(decide("/_app/start.js?v=3"));
    }

    #[test]
    fn test_api_prefix_never_uses_cache() {
        assert!(!decide("/api/manifest.json"));
        assert!(!decide("/api/session"));
        assert!(!decide("/apiary"));
    }

    #[test]
    fn test_extensions_use_cache() {
        for path in [
            "/models/avatar.glb",
            "/tfjs-backend-wasm/wasm-out/data.wasm",
            "/silero_vad.onnx",
            "/human/models/thing.tflite",
            "/vad.worklet.bundle.min.js",
            "/x.json?import",
        ] {
            assert!(decide(path), "{path} should use the cache");
        }
    }

    #[test]
    fn test_extension_overrides_api_prefix() {
        assert!(decide("/api/assets/avatar.glb"));
    }

    #[test]
    fn test_extension_in_query_uses_cache() {
        assert!(decide("/loader?file=face.onnx"));
        assert!(!decide("/x.json"));
        assert!(!decide("/bundle.js"));
    }

    #[test]
    fn test_response_source_names() {
        assert_eq!(ResponseSource::Cache.as_str(), "cache");
        assert_eq!(ResponseSource::PassThrough.as_str(), "pass-through");
    }
}
