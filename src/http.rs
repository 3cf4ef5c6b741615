//! Request and response model shared by the cache, the network and the worker
//!
//! A `Response` body behaves like a stream: it can be read exactly once. Code
//! that needs to hand the same response to two consumers (the caller and the
//! cache writer) must call `Response::try_clone` before either reads it.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors raised when reading or duplicating a response body
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    /// The body was already read by another consumer
    #[error("response body for {0} has already been consumed")]
    AlreadyConsumed(String),
}

/// How the request was issued, which decides what the network may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page navigation
    Navigate,
    /// Fails if the URL leaves the scope origin
    SameOrigin,
    /// Cross-origin reads yield an opaque response
    #[default]
    NoCors,
    /// Cross-origin reads are allowed and fully visible
    Cors,
}

impl RequestMode {
    /// Parses a mode as written on the command line
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "navigate" => Some(RequestMode::Navigate),
            "same-origin" | "sameorigin" => Some(RequestMode::SameOrigin),
            "no-cors" | "nocors" => Some(RequestMode::NoCors),
            "cors" => Some(RequestMode::Cors),
            _ => None,
        }
    }
}

/// Identity of a request inside a cache bucket
///
/// The fragment is not part of the identity; the query string is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An outgoing request seen by the fetch handler
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
}

impl Request {
    /// Creates a request with an explicit method and mode
    pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
        Self { method, url, mode }
    }

    /// Creates a GET request in the default `no-cors` mode
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::NoCors)
    }

    /// Whether the URL uses a scheme the cache handles
    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    /// The key this request is stored and looked up under
    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);
        RequestKey {
            method: self.method.as_str().to_string(),
            url: url.into(),
        }
    }
}

/// Visibility class of a response relative to the requesting origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response, fully readable
    Basic,
    /// Cross-origin response permitted by CORS
    Cors,
    /// Cross-origin `no-cors` response; status and headers are hidden
    Opaque,
    /// Network error placeholder
    Error,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseType::Basic => write!(f, "basic"),
            ResponseType::Cors => write!(f, "cors"),
            ResponseType::Opaque => write!(f, "opaque"),
            ResponseType::Error => write!(f, "error"),
        }
    }
}

/// A response whose body can be read once
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub kind: ResponseType,
    pub url: String,
    pub headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl Response {
    /// Creates a response with an unread body
    pub fn new(
        status: u16,
        kind: ResponseType,
        url: impl Into<String>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            kind,
            url: url.into(),
            headers,
            body: Some(body),
        }
    }

    /// Creates a `basic` response, the common same-origin case
    pub fn basic(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, ResponseType::Basic, url, Vec::new(), body.into())
    }

    /// Creates an opaque response: status 0 and no visible headers
    pub fn opaque(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(0, ResponseType::Opaque, url, Vec::new(), body)
    }

    /// Whether the status is in the 2xx range
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body has been read
    pub fn body_used(&self) -> bool {
        self.body.is_none()
    }

    /// Returns the value of the first header with the given name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Reads the body, leaving the response consumed
    pub fn bytes(&mut self) -> Result<Vec<u8>, BodyError> {
        self.body
            .take()
            .ok_or_else(|| BodyError::AlreadyConsumed(self.url.clone()))
    }

    /// Reads the body as UTF-8 text, replacing invalid sequences
    pub fn text(&mut self) -> Result<String, BodyError> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Duplicates an unread response so two consumers can each read a body
    pub fn try_clone(&self) -> Result<Response, BodyError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| BodyError::AlreadyConsumed(self.url.clone()))?;
        Ok(Response {
            status: self.status,
            status_text: self.status_text.clone(),
            kind: self.kind,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: Some(body),
        })
    }

    /// Consumes the response into its persisted form
    pub fn into_stored(mut self) -> Result<StoredResponse, BodyError> {
        let body = self.bytes()?;
        Ok(StoredResponse {
            status: self.status,
            status_text: self.status_text,
            kind: self.kind,
            url: self.url,
            headers: self.headers,
            body,
        })
    }
}

/// A response as held by a cache bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub status_text: String,
    pub kind: ResponseType,
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl StoredResponse {
    /// Produces a fresh, unread response for a cache hit
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text.clone(),
            kind: self.kind,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: Some(self.body.clone()),
        }
    }
}

/// Reason phrase for the statuses this crate reports on
fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}
