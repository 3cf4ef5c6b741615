//! The storage seam the asset cache manager reads and writes through

use async_trait::async_trait;
use thiserror::Error;

use crate::http::{RequestKey, Response, StoredResponse};

/// Errors raised by a cache storage backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("Cache I/O failed while {context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// A stored entry or bucket marker could not be decoded
    #[error("Corrupt cache data at {0}")]
    Corrupt(String),
}

impl CacheError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CacheError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A set of named cache buckets, each mapping request keys to responses
///
/// Individual `put` and `match_*` calls are atomic per key; nothing else is
/// synchronised. Bucket names are listed in creation order, which is also the
/// order `match_any` searches them in.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the bucket if it does not exist yet
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Whether a bucket with this name exists
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all buckets, oldest first
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Deletes a bucket and everything in it; returns whether it existed
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Stores a response, replacing any entry under the same key.
    /// The bucket is created if needed.
    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError>;

    /// Stores a batch of responses
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError> {
        for (key, response) in entries {
            self.put(name, key, response).await?;
        }
        Ok(())
    }

    /// Looks a request up in one bucket
    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError>;

    /// Looks a request up across all buckets, oldest bucket first
    async fn match_any(&self, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        for name in self.keys().await? {
            if let Some(response) = self.match_in(&name, key).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Request keys stored in a bucket; empty if the bucket does not exist
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError>;
}
