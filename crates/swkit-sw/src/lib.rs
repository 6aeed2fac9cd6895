//! # swkit Service Worker
//!
//! Offline caching and push agent modelled on the service worker lifecycle.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache the static manifest), activate (prune
//!   obsolete cache versions, claim clients)
//! - **Fetch interception**: cache-first with network fallback, selective
//!   bypass for live API traffic
//! - **Push**: payload decoding and de-duplicated notifications
//! - **Notification clicks**: focus an open window or open a new one
//! - **Background sync**: deferred work retried by the host
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host side)
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── scope
//!     └── ServiceWorkerAgent (event handlers)
//!             ├── CacheStorage ── Cache ── CacheKey → CacheEntry
//!             └── Platform
//!                     ├── Fetcher        (network)
//!                     ├── Notifier       (OS notifications)
//!                     ├── WindowClients  (open windows)
//!                     └── SyncDelegate   (deferred app work)
//! ```
//!
//! Every handler extends its own lifetime through [`ExtendableEvent`]; the
//! container awaits [`ExtendableEvent::settle`] before considering an event
//! finished.

use swkit_net::NetError;
use thiserror::Error;

pub mod agent;
pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod event;
pub mod fetch;
pub mod lifecycle;
pub mod push;
pub mod sync;

pub use agent::{Platform, ServiceWorkerAgent};
pub use cache::{Cache, CacheEntry, CacheKey, CacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients, WindowClients};
pub use config::{AgentConfig, NotificationDefaults, ResolvedConfig, CACHE_NAME, CACHE_VERSION};
pub use container::{DispatchedFetch, ServiceWorkerContainer, ServiceWorkerEvent};
pub use event::{EventKind, ExtendableEvent};
pub use fetch::FetchDisposition;
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use push::{NotificationDescriptor, NotificationTray, Notifier, PushFields, PushPayload};
pub use sync::{NoopSync, SyncDelegate};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed fetching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Quota exceeded for cache '{cache}': {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { cache: String, needed: u64, quota: u64 },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync '{tag}' failed: {reason}")]
    SyncFailed { tag: String, reason: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Extended work did not complete: {0}")]
    ExtensionAborted(String),
}

impl ServiceWorkerError {
    /// Whether the host should keep the triggering work scheduled for a
    /// later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceWorkerError::InstallFailed { .. }
                | ServiceWorkerError::Network(_)
                | ServiceWorkerError::SyncFailed { .. }
        )
    }
}
