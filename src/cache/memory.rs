//! In-process cache storage

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::storage::{CacheError, CacheStorage};
use crate::http::{RequestKey, Response, StoredResponse};

#[derive(Debug)]
struct Bucket {
    name: String,
    /// Insertion-ordered entries
    entries: Vec<(RequestKey, StoredResponse)>,
}

impl Bucket {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, key: RequestKey, response: StoredResponse) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = response,
            None => self.entries.push((key, response)),
        }
    }

    fn get(&self, key: &RequestKey) -> Option<&StoredResponse> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, response)| response)
    }
}

/// Cache storage held entirely in memory
///
/// Buckets are kept in creation order. `put_all` applies a batch under a
/// single write lock, so readers never observe half of it.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<Bucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut<'a>(buckets: &'a mut Vec<Bucket>, name: &str) -> &'a mut Bucket {
        match buckets.iter().position(|b| b.name == name) {
            Some(index) => &mut buckets[index],
            None => {
                buckets.push(Bucket::new(name));
                let last = buckets.len() - 1;
                &mut buckets[last]
            }
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut buckets = self.buckets.write().await;
        Self::bucket_mut(&mut buckets, name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.buckets.read().await.iter().any(|b| b.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .map(|b| b.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|b| b.name != name);
        Ok(buckets.len() != before)
    }

    async fn put(
        &self,
        name: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError> {
        let mut buckets = self.buckets.write().await;
        Self::bucket_mut(&mut buckets, name).insert(key, response);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError> {
        let mut buckets = self.buckets.write().await;
        let bucket = Self::bucket_mut(&mut buckets, name);
        for (key, response) in entries {
            bucket.insert(key, response);
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find(|b| b.name == name)
            .and_then(|b| b.get(key))
            .map(StoredResponse::to_response))
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<Response>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find_map(|b| b.get(key))
            .map(StoredResponse::to_response))
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.entries.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default())
    }
}
