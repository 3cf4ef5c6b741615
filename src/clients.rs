//! Open client views (pages) and which cache version controls them

use std::collections::HashMap;
use tokio::sync::RwLock;
use url::Url;

/// A page that can be controlled by an asset cache manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    /// Cache name of the manager controlling this client, if any
    pub controller: Option<String>,
}

/// Registry of open clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an uncontrolled client, replacing any client with the same id
    pub async fn register(&self, id: impl Into<String>, url: Url) {
        let id = id.into();
        let client = Client {
            id: id.clone(),
            url,
            controller: None,
        };
        self.clients.write().await.insert(id, client);
    }

    /// Removes a client, returning it if present
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Makes `controller` the controller of every client within `scope`
    ///
    /// Returns the number of clients claimed.
    pub async fn claim(&self, scope: &Url, controller: &str) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if in_scope(scope, &client.url) {
                client.controller = Some(controller.to_string());
                claimed += 1;
            }
        }
        claimed
    }
}

/// Whether `url` is on the scope's origin and under its path
fn in_scope(scope: &Url, url: &Url) -> bool {
    scope.origin() == url.origin() && url.path().starts_with(scope.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_claim_sets_controller_within_scope() {
        let registry = ClientRegistry::new();
        registry.register("a", url("https://field.example/app/")).await;
        registry.register("b", url("https://field.example/app/form.html")).await;
        registry.register("c", url("https://field.example/other/")).await;
        registry.register("d", url("https://elsewhere.example/app/")).await;

        let claimed = registry
            .claim(&url("https://field.example/app/"), "v2")
            .await;

        assert_eq!(claimed, 2);
        assert_eq!(registry.get("a").await.unwrap().controller.as_deref(), Some("v2"));
        assert_eq!(registry.get("b").await.unwrap().controller.as_deref(), Some("v2"));
        assert!(registry.get("c").await.unwrap().controller.is_none());
        assert!(registry.get("d").await.unwrap().controller.is_none());
    }

    #[tokio::test]
    async fn test_claim_replaces_previous_controller() {
        let registry = ClientRegistry::new();
        registry.register("a", url("https://field.example/")).await;
        let scope = url("https://field.example/");

        registry.claim(&scope, "v1").await;
        registry.claim(&scope, "v2").await;

        assert_eq!(registry.get("a").await.unwrap().controller.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty().await);

        registry.register("a", url("https://field.example/")).await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("a").await.is_some());
        assert!(registry.remove("a").await.is_none());
    }
}
