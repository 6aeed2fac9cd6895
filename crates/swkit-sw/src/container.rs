//! Host side of the agent: owns the registration, dispatches events, and
//! keeps each event alive until its extended work settles.

use std::collections::BTreeSet;

use swkit_net::{Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::agent::{Platform, ServiceWorkerAgent};
use crate::cache::CacheStorage;
use crate::config::AgentConfig;
use crate::event::{EventKind, ExtendableEvent};
use crate::fetch::FetchDisposition;
use crate::lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
use crate::push::NotificationDescriptor;
use crate::ServiceWorkerError;

/// Events reported to whoever embeds the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A client is now controlled by the active worker.
    ControllerChange { client_id: String },
}

/// Result of dispatching a fetch event.
#[derive(Debug)]
pub struct DispatchedFetch {
    pub disposition: FetchDisposition,

    /// The event, possibly still extended by a cache write. Dropping it
    /// aborts that work.
    pub lifetime: ExtendableEvent,
}

/// Service worker container: one registration, one agent.
pub struct ServiceWorkerContainer {
    agent: ServiceWorkerAgent,

    registration: RwLock<ServiceWorkerRegistration>,

    /// Lifetimes of fetch events whose responses were already delivered.
    background: Mutex<JoinSet<Result<(), ServiceWorkerError>>>,

    /// Sync tags waiting for a successful run.
    pending_syncs: Mutex<BTreeSet<String>>,

    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container with unbounded cache storage.
    pub fn new(
        config: AgentConfig,
        platform: Platform,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        Self::with_storage(config, platform, CacheStorage::new())
    }

    /// Create a container over existing cache storage.
    pub fn with_storage(
        config: AgentConfig,
        platform: Platform,
        storage: CacheStorage,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>), ServiceWorkerError> {
        let config = config.resolve()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let registration = ServiceWorkerRegistration::new(config.scope.clone());
        let agent = ServiceWorkerAgent::new(
            config,
            std::sync::Arc::new(RwLock::new(storage)),
            platform,
            event_tx.clone(),
        );

        info!(
            scope = %agent.config().scope,
            cache = %agent.config().cache_name,
            "Service worker container created"
        );

        Ok((
            Self {
                agent,
                registration: RwLock::new(registration),
                background: Mutex::new(JoinSet::new()),
                pending_syncs: Mutex::new(BTreeSet::new()),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn agent(&self) -> &ServiceWorkerAgent {
        &self.agent
    }

    /// The active worker, if any.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    /// The installed worker waiting to activate, if any.
    pub async fn waiting_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    async fn is_controlling(&self) -> bool {
        self.registration
            .read()
            .await
            .get_active()
            .is_some_and(ServiceWorker::is_active)
    }

    async fn require_active(&self, kind: EventKind) -> Result<(), ServiceWorkerError> {
        if self.is_controlling().await {
            Ok(())
        } else {
            Err(ServiceWorkerError::StateError(format!(
                "No active worker to receive {} event",
                kind
            )))
        }
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        debug!(?worker_id, ?new_state, "Worker state change");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    // ==================== Lifecycle ====================

    /// Install a new worker for the configured version. On success the
    /// worker activates immediately if the install handler asked to skip
    /// waiting.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        let worker_id = self
            .registration
            .write()
            .await
            .begin_install(&self.agent.config().cache_name);
        self.emit_state(worker_id, ServiceWorkerState::Installing);

        let mut event = ExtendableEvent::new(EventKind::Install);
        self.agent.on_install(&mut event);

        if let Err(e) = event.settle().await {
            error!(error = %e, "Install failed");
            self.registration.write().await.install_failed(&e);
            self.emit_state(worker_id, ServiceWorkerState::Redundant);
            return Err(e);
        }

        self.registration.write().await.install_complete();
        self.emit_state(worker_id, ServiceWorkerState::Installed);

        if self.agent.take_skip_waiting() {
            debug!("Skipping waiting");
            self.activate().await?;
        }
        Ok(())
    }

    /// Activate the waiting worker. The worker becomes active even if the
    /// activate handler fails; the failure is still returned.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let (worker_id, retired) = {
            let mut registration = self.registration.write().await;
            let retired = registration.begin_activate()?;
            let worker_id = registration
                .get_active()
                .map(|w| w.id)
                .ok_or_else(|| ServiceWorkerError::StateError("Activation lost its worker".to_string()))?;
            (worker_id, retired)
        };

        if let Some(old) = retired {
            self.emit_state(old.id, ServiceWorkerState::Redundant);
        }
        self.emit_state(worker_id, ServiceWorkerState::Activating);

        let mut event = ExtendableEvent::new(EventKind::Activate);
        self.agent.on_activate(&mut event);
        let result = event.settle().await;

        self.registration.write().await.activation_complete();
        self.emit_state(worker_id, ServiceWorkerState::Activated);

        match result {
            Ok(()) => {
                info!(cache = %self.agent.config().cache_name, "Worker activated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Activate handler failed");
                Err(e)
            }
        }
    }

    // ==================== Fetch ====================

    /// Dispatch a fetch event. Requests arriving before a worker is active
    /// are not intercepted.
    pub async fn handle_fetch(&self, request: Request) -> Result<DispatchedFetch, ServiceWorkerError> {
        let mut lifetime = ExtendableEvent::new(EventKind::Fetch);

        if !self.is_controlling().await {
            return Ok(DispatchedFetch {
                disposition: FetchDisposition::Passthrough,
                lifetime,
            });
        }

        let disposition = self.agent.on_fetch(request, &mut lifetime).await?;
        Ok(DispatchedFetch {
            disposition,
            lifetime,
        })
    }

    /// Fetch on behalf of a page: the response is returned as soon as it is
    /// known, while any cache write keeps running until [`drain`](Self::drain).
    pub async fn fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let fallback = request.clone();
        let DispatchedFetch {
            disposition,
            lifetime,
        } = self.handle_fetch(request).await?;

        if lifetime.pending() > 0 {
            let mut background = self.background.lock().await;
            reap_finished(&mut background);
            background.spawn(lifetime.settle());
        }

        match disposition {
            FetchDisposition::Respond(response) => Ok(response),
            FetchDisposition::Passthrough => Ok(self.agent.platform.fetcher.fetch(fallback).await?),
        }
    }

    /// Background lifetimes not yet collected. Each [`fetch`](Self::fetch)
    /// that starts one first collects those already finished.
    pub async fn in_flight(&self) -> usize {
        self.background.lock().await.len()
    }

    /// Wait for every background lifetime started by [`fetch`](Self::fetch).
    /// Failures of lifetimes already collected by a later fetch were logged
    /// and are not reported again.
    pub async fn drain(&self) -> Result<(), ServiceWorkerError> {
        let mut background = std::mem::replace(&mut *self.background.lock().await, JoinSet::new());
        let mut first_error = None;

        while let Some(joined) = background.join_next().await {
            let outcome = joined
                .map_err(|e| ServiceWorkerError::ExtensionAborted(e.to_string()))
                .and_then(|result| result);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ==================== Functional events ====================

    /// Dispatch a push message.
    pub async fn push(&self, data: Option<&[u8]>) -> Result<(), ServiceWorkerError> {
        self.require_active(EventKind::Push).await?;
        let mut event = ExtendableEvent::new(EventKind::Push);
        self.agent.on_push(data, &mut event);
        event.settle().await
    }

    /// Dispatch a click on `notification`.
    pub async fn notification_click(
        &self,
        notification: &NotificationDescriptor,
    ) -> Result<(), ServiceWorkerError> {
        self.require_active(EventKind::NotificationClick).await?;
        let mut event = ExtendableEvent::new(EventKind::NotificationClick);
        self.agent.on_notification_click(notification, &mut event).await;
        event.settle().await
    }

    /// Dispatch a sync event once.
    pub async fn sync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        self.require_active(EventKind::Sync).await?;
        let mut event = ExtendableEvent::new(EventKind::Sync);
        self.agent.on_sync(tag, &mut event);
        event.settle().await
    }

    /// Schedule `tag` for the next [`replay_sync`](Self::replay_sync).
    pub async fn register_sync(&self, tag: &str) {
        self.pending_syncs.lock().await.insert(tag.to_string());
    }

    /// Tags still waiting for a successful run.
    pub async fn pending_syncs(&self) -> Vec<String> {
        self.pending_syncs.lock().await.iter().cloned().collect()
    }

    /// Run every pending sync tag. Tags whose run failed stay pending.
    /// Returns the tags still pending.
    pub async fn replay_sync(&self) -> Vec<String> {
        let tags = self.pending_syncs().await;

        for tag in tags {
            match self.sync(&tag).await {
                Ok(()) => {
                    self.pending_syncs.lock().await.remove(&tag);
                }
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Sync failed, keeping it scheduled");
                }
            }
        }

        self.pending_syncs().await
    }
}

/// Drop every finished lifetime from `background`, logging failures.
fn reap_finished(background: &mut JoinSet<Result<(), ServiceWorkerError>>) {
    while let Some(joined) = background.try_join_next() {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Background fetch work failed"),
            Err(e) => warn!(error = %e, "Background fetch work aborted"),
        }
    }
}
