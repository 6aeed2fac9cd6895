//! The agent: configuration, cache storage, and platform collaborators
//! shared by every event handler.
//!
//! Handlers live next to their concerns (`lifecycle`, `fetch`, `push`,
//! `clients`, `sync`) as `impl ServiceWorkerAgent` blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use swkit_net::Fetcher;
use tokio::sync::{mpsc, RwLock};

use crate::cache::CacheStorage;
use crate::clients::WindowClients;
use crate::config::ResolvedConfig;
use crate::container::ServiceWorkerEvent;
use crate::push::Notifier;
use crate::sync::SyncDelegate;

/// Platform services the agent talks to.
#[derive(Clone)]
pub struct Platform {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub clients: Arc<dyn WindowClients>,
    pub sync: Arc<dyn SyncDelegate>,
}

/// Event handlers plus the state they share.
pub struct ServiceWorkerAgent {
    pub(crate) config: Arc<ResolvedConfig>,
    pub(crate) caches: Arc<RwLock<CacheStorage>>,
    pub(crate) platform: Platform,
    pub(crate) skip_waiting: Arc<AtomicBool>,
    pub(crate) events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerAgent {
    pub fn new(
        config: ResolvedConfig,
        caches: Arc<RwLock<CacheStorage>>,
        platform: Platform,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            caches,
            platform,
            skip_waiting: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Consume a pending skip-waiting request.
    pub(crate) fn take_skip_waiting(&self) -> bool {
        self.skip_waiting.swap(false, Ordering::SeqCst)
    }
}
