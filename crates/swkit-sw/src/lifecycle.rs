//! Worker lifecycle: registration state plus the install and activate
//! handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, info};
use url::Url;

use crate::agent::ServiceWorkerAgent;
use crate::cache::CacheKey;
use crate::container::ServiceWorkerEvent;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, no event dispatched yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache store this worker serves from.
    pub cache_name: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(cache_name: &str) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            cache_name: cache_name.to_string(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Start installing a new worker. Any previous installing worker becomes
    /// redundant.
    pub fn begin_install(&mut self, cache_name: &str) -> ServiceWorkerId {
        if let Some(mut stale) = self.installing.take() {
            stale.set_state(ServiceWorkerState::Redundant);
        }
        let mut worker = ServiceWorker::new(cache_name);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Transition installing to waiting. A worker already waiting is replaced.
    pub fn install_complete(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut replaced) = self.waiting.take() {
            replaced.set_state(ServiceWorkerState::Redundant);
        }
        let id = worker.id;
        self.waiting = Some(worker);
        Some(id)
    }

    /// Discard the installing worker after a failed install.
    pub fn install_failed(&mut self, error: &ServiceWorkerError) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.error = Some(error.to_string());
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Promote the waiting worker to active (state `Activating`), retiring
    /// the previous active worker. Returns the retired worker, if any.
    pub fn begin_activate(&mut self) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = self.waiting.take().ok_or_else(|| {
            ServiceWorkerError::StateError("No waiting worker to activate".to_string())
        })?;
        worker.set_state(ServiceWorkerState::Activating);

        let retired = self.active.take().map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });

        self.active = Some(worker);
        Ok(retired)
    }

    /// Mark the active worker as activated.
    pub fn activation_complete(&mut self) -> Option<ServiceWorkerId> {
        let worker = self.active.as_mut()?;
        worker.set_state(ServiceWorkerState::Activated);
        Some(worker.id)
    }
}

// ==================== Handlers ====================

impl ServiceWorkerAgent {
    /// Install: precache every static asset, all or nothing, then ask to
    /// skip waiting.
    pub fn on_install(&self, event: &mut ExtendableEvent) {
        let fetcher = Arc::clone(&self.platform.fetcher);
        let caches = Arc::clone(&self.caches);
        let config = Arc::clone(&self.config);
        let skip_waiting = Arc::clone(&self.skip_waiting);

        event.wait_until(async move {
            info!(
                cache = %config.cache_name,
                assets = config.static_assets.len(),
                "Precaching static assets"
            );

            let fetches = config
                .static_assets
                .iter()
                .cloned()
                .map(|url| precache(Arc::clone(&fetcher), url));

            // Every fetch runs to completion before the batch is judged.
            let entries = join_all(fetches)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;

            caches.write().await.put_all(&config.cache_name, entries)?;

            info!(cache = %config.cache_name, "Static assets cached");
            skip_waiting.store(true, Ordering::SeqCst);
            Ok(())
        });
    }

    /// Activate: delete every cache that is not the current one, then claim
    /// all open clients.
    pub fn on_activate(&self, event: &mut ExtendableEvent) {
        let caches = Arc::clone(&self.caches);
        let config = Arc::clone(&self.config);
        let clients = Arc::clone(&self.platform.clients);
        let events = self.events.clone();

        event.wait_until(async move {
            {
                let mut storage = caches.write().await;
                for name in storage.keys() {
                    if name != config.cache_name {
                        info!(cache = %name, "Deleting obsolete cache");
                        storage.delete(&name);
                    }
                }
            }

            let claimed = clients.claim(&config.scope).await?;
            debug!(count = claimed.len(), "Clients claimed");
            for client_id in claimed {
                let _ = events.send(ServiceWorkerEvent::ControllerChange { client_id });
            }
            Ok(())
        });
    }
}

async fn precache(
    fetcher: Arc<dyn Fetcher>,
    url: Url,
) -> Result<(CacheKey, Response), ServiceWorkerError> {
    let response = fetcher
        .fetch(Request::get(url.clone()))
        .await
        .map_err(|e| ServiceWorkerError::InstallFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !response.ok() {
        return Err(ServiceWorkerError::InstallFailed {
            url: url.to_string(),
            reason: format!("status {}", response.status),
        });
    }

    Ok((CacheKey::get(url), response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://game.test/").unwrap()
    }

    #[test]
    fn test_service_worker_creation() {
        let worker = ServiceWorker::new("game-cache-v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);
        assert!(!worker.is_active());
        assert!(!worker.is_redundant());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = ServiceWorkerRegistration::new(scope());
        assert!(registration.get_active().is_none());

        let id = registration.begin_install("game-cache-v1");
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            ServiceWorkerState::Installing
        );

        assert_eq!(registration.install_complete(), Some(id));
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().unwrap().state,
            ServiceWorkerState::Installed
        );

        assert!(registration.begin_activate().unwrap().is_none());
        assert_eq!(registration.activation_complete(), Some(id));
        assert!(registration.get_active().unwrap().is_active());
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_new_version_retires_old_active() {
        let mut registration = ServiceWorkerRegistration::new(scope());
        registration.begin_install("game-cache-v1");
        registration.install_complete();
        registration.begin_activate().unwrap();
        registration.activation_complete();

        registration.begin_install("game-cache-v2");
        registration.install_complete();
        let retired = registration.begin_activate().unwrap().unwrap();

        assert!(retired.is_redundant());
        assert_eq!(retired.cache_name, "game-cache-v1");
        assert_eq!(registration.get_active().unwrap().cache_name, "game-cache-v2");
    }

    #[test]
    fn test_install_failed_marks_redundant() {
        let mut registration = ServiceWorkerRegistration::new(scope());
        registration.begin_install("game-cache-v1");

        let error = ServiceWorkerError::InstallFailed {
            url: "https://game.test/app.js".to_string(),
            reason: "status 500".to_string(),
        };
        let worker = registration.install_failed(&error).unwrap();

        assert!(worker.is_redundant());
        assert!(worker.error.unwrap().contains("app.js"));
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_activate_without_waiting_worker() {
        let mut registration = ServiceWorkerRegistration::new(scope());
        assert!(matches!(
            registration.begin_activate(),
            Err(ServiceWorkerError::StateError(_))
        ));
    }
}
