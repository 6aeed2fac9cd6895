//! Window clients and notification-click routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::agent::ServiceWorkerAgent;
use crate::event::ExtendableEvent;
use crate::push::NotificationDescriptor;
use crate::ServiceWorkerError;

// ==================== Client ====================

/// A client (open page or worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this agent controls the client.
    pub controlled: bool,
}

impl Client {
    /// An uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Options for `match_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }

    fn accepts(&self, client: &Client) -> bool {
        if !self.include_uncontrolled && !client.controlled {
            return false;
        }
        match self.client_type {
            ClientType::All => true,
            t => client.client_type == t,
        }
    }
}

// ==================== Clients ====================

/// Clients API as exposed by the platform.
#[async_trait]
pub trait WindowClients: Send + Sync {
    /// Clients matching `options`.
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client>;

    /// Bring a window client to the foreground.
    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError>;

    /// Open a new top-level window.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Take control of every in-scope client. Returns the newly controlled IDs.
    async fn claim(&self, scope: &Url) -> Result<Vec<String>, ServiceWorkerError>;
}

/// In-memory clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<String, Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Remove a client.
    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait]
impl WindowClients for Clients {
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| options.accepts(c))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        match clients.get(id) {
            Some(c) if c.client_type != ClientType::Window => {
                return Err(ServiceWorkerError::StateError(
                    "Can only focus window clients".to_string(),
                ));
            }
            Some(_) => {}
            None => return Err(ServiceWorkerError::NotFound(format!("client {}", id))),
        }

        for client in clients.values_mut() {
            client.focused = client.id == id;
        }
        clients
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {}", id)))
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.focused = false;
        }

        let mut client = Client::window(url.clone());
        client.focused = true;
        clients.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    async fn claim(&self, scope: &Url) -> Result<Vec<String>, ServiceWorkerError> {
        let mut claimed = Vec::new();
        for client in self.clients.write().await.values_mut() {
            if !client.controlled && client.url.as_str().starts_with(scope.as_str()) {
                client.controlled = true;
                claimed.push(client.id.clone());
            }
        }
        claimed.sort();
        Ok(claimed)
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ==================== Notification click ====================

impl ServiceWorkerAgent {
    /// Handle a click on a notification: close it, then focus an open
    /// application window or open a new one.
    pub async fn on_notification_click(
        &self,
        notification: &NotificationDescriptor,
        event: &mut ExtendableEvent,
    ) {
        self.platform.notifier.close(&notification.tag).await;

        let clients = Arc::clone(&self.platform.clients);
        let config = Arc::clone(&self.config);

        event.wait_until(async move {
            let windows = clients.match_all(ClientMatchOptions::all_windows()).await;
            let identity = config.scope.as_str();

            if let Some(window) = windows.iter().find(|c| c.url.as_str().contains(identity)) {
                debug!(client = %window.id, url = %window.url, "Focusing existing window");
                clients.focus(&window.id).await?;
                return Ok(());
            }

            info!(url = %config.start_url, "No open window, opening one");
            clients.open_window(&config.start_url).await?;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_open_window_focuses_new_client() {
        let clients = Clients::new();
        let existing = Client::window(url("https://game.test/"));
        clients.add(existing.clone()).await;
        clients.focus(&existing.id).await.unwrap();

        let opened = clients.open_window(&url("https://game.test/play")).await.unwrap();

        assert!(opened.focused);
        assert_eq!(opened.client_type, ClientType::Window);
        assert!(!clients.get(&existing.id).await.unwrap().focused);
        assert_eq!(clients.len().await, 2);
    }

    #[tokio::test]
    async fn test_match_all_respects_controlled_flag() {
        let clients = Clients::new();
        clients.add(Client::window(url("https://game.test/"))).await;

        let controlled_only = ClientMatchOptions::default();
        assert!(clients.match_all(controlled_only).await.is_empty());
        assert_eq!(clients.match_all(ClientMatchOptions::all_windows()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_focus_rejects_worker_clients() {
        let clients = Clients::new();
        let mut worker = Client::window(url("https://game.test/worker.js"));
        worker.client_type = ClientType::Worker;
        clients.add(worker.clone()).await;

        assert!(matches!(
            clients.focus(&worker.id).await,
            Err(ServiceWorkerError::StateError(_))
        ));
        assert!(matches!(
            clients.focus("client-missing").await,
            Err(ServiceWorkerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_only_in_scope() {
        let clients = Clients::new();
        let inside = Client::window(url("https://game.test/index.html"));
        let outside = Client::window(url("https://other.test/"));
        clients.add(inside.clone()).await;
        clients.add(outside.clone()).await;

        let claimed = clients.claim(&url("https://game.test/")).await.unwrap();
        assert_eq!(claimed, vec![inside.id.clone()]);
        assert!(clients.get(&inside.id).await.unwrap().controlled);
        assert!(!clients.get(&outside.id).await.unwrap().controlled);

        // Already controlled clients are not reported twice.
        assert!(clients.claim(&url("https://game.test/")).await.unwrap().is_empty());
    }
}
