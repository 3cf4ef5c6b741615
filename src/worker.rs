//! Asset cache manager: the install / activate / fetch lifecycle
//!
//! The host (a browser-like runtime, or the `shellcache` binary) dispatches
//! lifecycle events through the `LifecycleHandler` trait. The manager itself
//! only knows about its configuration, a `CacheStorage`, a `Network` and a
//! `ClientRegistry`.
//!
//! Fetch policy is cache-first: any bucket hit is served as-is, misses go to
//! the network, and successful same-origin responses are copied into the
//! current bucket by a background task the caller never waits on.

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Method;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheError, CacheStorage};
use crate::clients::ClientRegistry;
use crate::config::{CacheConfig, ConfigError};
use crate::http::{
    BodyError, Request, RequestKey, RequestMode, Response, ResponseType, StoredResponse,
};
use crate::network::{Network, NetworkError};

/// Capacity of the cache event channel; slow subscribers lose old events
const EVENT_CAPACITY: usize = 64;

/// Errors surfaced by lifecycle handlers
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The manifest or scope is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cache store failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A response body was read twice
    #[error(transparent)]
    Body(#[from] BodyError),

    /// The network could not produce a response
    #[error("Fetch failed for {url}: {source}")]
    Network {
        url: String,
        source: NetworkError,
    },

    /// A manifest asset answered with a non-2xx status
    #[error("Asset {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
}

/// Outcome of a background cache write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A network response was written to the bucket
    Stored { cache_name: String, key: RequestKey },
    /// Writing a network response failed
    StoreFailed {
        cache_name: String,
        key: RequestKey,
        error: String,
    },
}

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    /// Number of manifest assets written to the bucket
    pub cached: usize,
}

/// Result of a successful activate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivateReport {
    /// Stale buckets that were deleted
    pub deleted: Vec<String>,
    /// Clients now controlled by this manager
    pub claimed: usize,
}

/// How a fetch event was answered
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host should apply its default handling
    Passthrough(Request),
    /// Served from a cache bucket without touching the network
    Cached(Response),
    /// Served from the network; `caching` tells whether a copy is being
    /// written to the current bucket in the background
    Network { response: Response, caching: bool },
}

impl FetchOutcome {
    /// The response to hand back, or `None` for a passthrough
    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough(_) => None,
            FetchOutcome::Cached(response) => Some(response),
            FetchOutcome::Network { response, .. } => Some(response),
        }
    }
}

/// The three lifecycle events a host dispatches
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Pre-caches the asset manifest into the current bucket
    async fn on_install(&self) -> Result<InstallReport, WorkerError>;

    /// Removes stale buckets and claims open clients
    async fn on_activate(&self) -> Result<ActivateReport, WorkerError>;

    /// Answers an outgoing request
    async fn on_fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError>;
}

/// Whether the manager looks at this request at all
pub fn is_interceptable(request: &Request) -> bool {
    request.method == Method::GET && request.is_http()
}

/// Whether a network response may be written to the cache
pub fn is_cacheable(response: &Response) -> bool {
    response.status == 200 && response.kind == ResponseType::Basic
}

/// Cache-first asset cache for one versioned bucket
#[derive(Clone)]
pub struct AssetCacheManager {
    config: Arc<CacheConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<ClientRegistry>,
    events: broadcast::Sender<CacheEvent>,
}

impl AssetCacheManager {
    /// Creates a manager with its own empty client registry
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: Arc::new(config),
            storage,
            network,
            clients: Arc::new(ClientRegistry::new()),
            events,
        }
    }

    /// Shares an existing client registry with this manager
    pub fn with_clients(mut self, clients: Arc<ClientRegistry>) -> Self {
        self.clients = clients;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Subscribes to background cache write outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    async fn precache(&self) -> Result<InstallReport, WorkerError> {
        let cache_name = self.cache_name();
        let urls = self.config.resolve_assets()?;

        self.storage.open(cache_name).await?;
        info!(bucket = cache_name, assets = urls.len(), "caching app shell");

        let downloads = urls.into_iter().map(|url| self.download(url));
        let entries = try_join_all(downloads).await?;
        let cached = entries.len();
        self.storage.put_all(cache_name, entries).await?;

        Ok(InstallReport {
            cache_name: cache_name.to_string(),
            cached,
        })
    }

    /// Fetches one manifest asset; anything but a 2xx fails the install
    async fn download(&self, url: Url) -> Result<(RequestKey, StoredResponse), WorkerError> {
        let request = Request::new(Method::GET, url, RequestMode::Cors);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|source| WorkerError::Network {
                url: request.url.to_string(),
                source,
            })?;

        if !response.ok() {
            return Err(WorkerError::BadStatus {
                url: request.url.to_string(),
                status: response.status,
            });
        }

        debug!(url = %request.url, "fetched asset");
        Ok((request.key(), response.into_stored()?))
    }

    async fn purge_and_claim(&self) -> Result<ActivateReport, WorkerError> {
        let current = self.cache_name();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            info!(bucket = %name, "deleting old cache");
            self.storage.delete(name).await
        });
        try_join_all(deletions).await?;

        let claimed = self.clients.claim(&self.config.scope, current).await;
        info!(bucket = current, claimed, "activation complete");

        Ok(ActivateReport {
            deleted: stale,
            claimed,
        })
    }

    /// Writes `response` to the current bucket without blocking the caller
    fn store_in_background(&self, key: RequestKey, response: Response) {
        let storage = Arc::clone(&self.storage);
        let events = self.events.clone();
        let cache_name = self.config.cache_name.clone();

        tokio::spawn(async move {
            let result = match response.into_stored() {
                Ok(stored) => storage
                    .put(&cache_name, key.clone(), stored)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            let event = match result {
                Ok(()) => {
                    debug!(bucket = %cache_name, key = %key, "cached network response");
                    CacheEvent::Stored { cache_name, key }
                }
                Err(error) => {
                    warn!(bucket = %cache_name, key = %key, %error, "failed to cache network response");
                    CacheEvent::StoreFailed {
                        cache_name,
                        key,
                        error,
                    }
                }
            };
            // No subscribers is fine
            let _ = events.send(event);
        });
    }
}

#[async_trait]
impl LifecycleHandler for AssetCacheManager {
    async fn on_install(&self) -> Result<InstallReport, WorkerError> {
        info!(bucket = self.cache_name(), "installing");
        let result = self.precache().await;
        match &result {
            Ok(report) => info!(bucket = %report.cache_name, cached = report.cached, "install complete"),
            Err(e) => error!(bucket = self.cache_name(), error = %e, "failed to cache app shell"),
        }
        result
    }

    async fn on_activate(&self) -> Result<ActivateReport, WorkerError> {
        info!(bucket = self.cache_name(), "activating");
        let result = self.purge_and_claim().await;
        if let Err(e) = &result {
            error!(bucket = self.cache_name(), error = %e, "activation failed");
        }
        result
    }

    async fn on_fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        if !is_interceptable(&request) {
            debug!(method = %request.method, url = %request.url, "not intercepted");
            return Ok(FetchOutcome::Passthrough(request));
        }

        let key = request.key();
        if let Some(response) = self.storage.match_any(&key).await? {
            debug!(url = %request.url, "serving from cache");
            return Ok(FetchOutcome::Cached(response));
        }

        debug!(url = %request.url, "fetching from network");
        let response = match self.network.fetch(&request).await {
            Ok(response) => response,
            Err(source) => {
                error!(url = %request.url, error = %source, "fetch failed");
                return Err(WorkerError::Network {
                    url: request.url.to_string(),
                    source,
                });
            }
        };

        if !is_cacheable(&response) {
            return Ok(FetchOutcome::Network {
                response,
                caching: false,
            });
        }

        let copy = response.try_clone()?;
        self.store_in_background(key, copy);
        Ok(FetchOutcome::Network {
            response,
            caching: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned bodies; unknown URLs fail like an offline network
    #[derive(Default)]
    struct StubNetwork {
        routes: HashMap<String, (u16, ResponseType)>,
        calls: Mutex<Vec<String>>,
    }

    impl StubNetwork {
        fn route(mut self, url: &str, status: u16, kind: ResponseType) -> Self {
            self.routes.insert(url.to_string(), (status, kind));
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Network for StubNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            let url = request.url.to_string();
            self.calls.lock().unwrap().push(url.clone());
            match self.routes.get(&url) {
                Some((status, kind)) => Ok(Response::new(
                    *status,
                    *kind,
                    url.clone(),
                    Vec::new(),
                    format!("body of {}", url).into_bytes(),
                )),
                None => Err(NetworkError::Other("offline".to_string())),
            }
        }
    }

    fn setup(
        network: StubNetwork,
        assets: &[&str],
    ) -> (AssetCacheManager, Arc<StubNetwork>, Arc<MemoryStorage>) {
        let config = CacheConfig::new("v2", "https://app.test/", assets.iter().copied()).unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(network);
        let manager = AssetCacheManager::new(config, storage.clone(), network.clone());
        (manager, network, storage)
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_is_interceptable() {
        assert!(is_interceptable(&get("https://app.test/index.html")));
        assert!(!is_interceptable(&get("data:image/png;base64,AAAA")));

        let post = Request::new(
            Method::POST,
            Url::parse("https://app.test/submit").unwrap(),
            RequestMode::Cors,
        );
        assert!(!is_interceptable(&post));
    }

    #[test]
    fn test_is_cacheable() {
        assert!(is_cacheable(&Response::basic(200, "https://app.test/", "")));
        assert!(!is_cacheable(&Response::basic(404, "https://app.test/", "")));
        assert!(!is_cacheable(&Response::basic(204, "https://app.test/", "")));
        assert!(!is_cacheable(&Response::opaque("https://x.test/", Vec::new())));
        assert!(!is_cacheable(&Response::new(
            200,
            ResponseType::Cors,
            "https://x.test/",
            Vec::new(),
            Vec::new()
        )));
    }

    #[tokio::test]
    async fn test_install_stores_every_asset() {
        let network = StubNetwork::default()
            .route("https://app.test/", 200, ResponseType::Basic)
            .route("https://app.test/index.html", 200, ResponseType::Basic);
        let (manager, _, storage) = setup(network, &["./", "index.html"]);

        let report = manager.on_install().await.unwrap();

        assert_eq!(report.cached, 2);
        assert_eq!(storage.entries("v2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let network = StubNetwork::default()
            .route("https://app.test/", 200, ResponseType::Basic)
            .route("https://app.test/missing.png", 404, ResponseType::Basic);
        let (manager, _, storage) = setup(network, &["./", "missing.png"]);

        let err = manager.on_install().await.unwrap_err();

        assert!(matches!(err, WorkerError::BadStatus { status: 404, .. }));
        assert!(storage.entries("v2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_response_served_without_network() {
        let network = StubNetwork::default().route("https://app.test/", 200, ResponseType::Basic);
        let (manager, network, _) = setup(network, &["./"]);
        manager.on_install().await.unwrap();
        let calls_after_install = network.calls();

        let outcome = manager.on_fetch(get("https://app.test/")).await.unwrap();

        assert!(matches!(outcome, FetchOutcome::Cached(_)));
        assert_eq!(network.calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_network_failure_is_an_error() {
        let (manager, _, _) = setup(StubNetwork::default(), &[]);

        let err = manager
            .on_fetch(get("https://app.test/offline.js"))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Network { .. }));
    }

    #[tokio::test]
    async fn test_background_write_publishes_event() {
        let network =
            StubNetwork::default().route("https://app.test/app.js", 200, ResponseType::Basic);
        let (manager, _, _) = setup(network, &[]);
        let mut events = manager.subscribe();

        let outcome = manager.on_fetch(get("https://app.test/app.js")).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Network { caching: true, .. }));

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            CacheEvent::Stored {
                cache_name: "v2".to_string(),
                key: get("https://app.test/app.js").key(),
            }
        );
    }

    #[tokio::test]
    async fn test_activate_with_nothing_to_delete() {
        let (manager, _, storage) = setup(StubNetwork::default(), &[]);
        storage.open("v2").await.unwrap();

        let report = manager.on_activate().await.unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.claimed, 0);
        assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
    }
}
