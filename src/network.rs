//! Network transport used for manifest downloads and cache misses
//!
//! `HttpNetwork` performs real requests with reqwest and classifies each
//! response relative to the scope origin, the same way a browser would label
//! it `basic`, `cors` or `opaque`.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::{Origin, Url};

use crate::http::{Request, RequestMode, Response, ResponseType};

/// Errors that can occur when fetching from the network
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// A `same-origin` request pointed at another origin
    #[error("Cross-origin request blocked in same-origin mode: {0}")]
    CrossOrigin(String),

    /// The URL scheme cannot be fetched over HTTP
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Any other transport failure (used by alternative transports)
    #[error("Network failure: {0}")]
    Other(String),
}

/// Something that can turn a request into a response
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Decides the response type for a request issued from `origin`
pub fn classify(origin: &Origin, request: &Request) -> Result<ResponseType, NetworkError> {
    if request.url.origin() == *origin {
        return Ok(ResponseType::Basic);
    }
    match request.mode {
        RequestMode::SameOrigin => Err(NetworkError::CrossOrigin(request.url.to_string())),
        RequestMode::Cors => Ok(ResponseType::Cors),
        // Cross-origin navigations are top-level loads, visible to the page
        RequestMode::Navigate => Ok(ResponseType::Basic),
        RequestMode::NoCors => Ok(ResponseType::Opaque),
    }
}

/// Real HTTP transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Origin,
}

impl HttpNetwork {
    /// Creates a transport whose same-origin checks use the scope's origin
    pub fn new(scope: &Url) -> Self {
        Self::with_client(Client::new(), scope)
    }

    /// Creates a transport with a custom HTTP client
    pub fn with_client(client: Client, scope: &Url) -> Self {
        Self {
            client,
            origin: scope.origin(),
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        if !request.is_http() {
            return Err(NetworkError::UnsupportedScheme(
                request.url.scheme().to_string(),
            ));
        }
        let kind = classify(&self.origin, request)?;

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(
            url = %request.url,
            status,
            kind = %kind,
            bytes = body.len(),
            "network response"
        );

        Ok(match kind {
            ResponseType::Opaque => Response::opaque(final_url, body),
            _ => Response::new(status, kind, final_url, headers, body),
        })
    }
}
