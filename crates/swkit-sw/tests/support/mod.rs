//! Shared fixtures for the agent tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::StatusCode;
use swkit_net::{Fetcher, NetError, Request, Response};
use swkit_sw::{
    AgentConfig, CacheStorage, Clients, NotificationTray, Platform, ServiceWorkerContainer,
    ServiceWorkerError, ServiceWorkerEvent, SyncDelegate,
};
use tokio::sync::mpsc;
use url::Url;

pub const SCOPE: &str = "https://game.test/";

pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// A network made of canned responses. Unknown URLs answer 404.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, (StatusCode, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &Url, status: u16, body: &str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            (StatusCode::from_u16(status).unwrap(), body.as_bytes().to_vec()),
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network unreachable".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        Ok(match route {
            Some((status, body)) => Response::new(request.url, status, body),
            None => Response::new(request.url, StatusCode::NOT_FOUND, "not found"),
        })
    }
}

/// Sync delegate that fails until told otherwise.
#[derive(Default)]
pub struct ScriptedSync {
    failing: AtomicBool,
    runs: AtomicUsize,
}

impl ScriptedSync {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncDelegate for ScriptedSync {
    async fn sync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ServiceWorkerError::StateError(format!("{} backend offline", tag)))
        } else {
            Ok(())
        }
    }
}

pub const ASSETS: &[&str] = &["/", "/index.html", "/app.js"];

pub fn config() -> AgentConfig {
    AgentConfig {
        scope: SCOPE.to_string(),
        static_assets: ASSETS.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// A fetcher that serves every manifest asset.
pub fn healthy_network() -> Arc<StaticFetcher> {
    let fetcher = Arc::new(StaticFetcher::new());
    for path in ASSETS {
        fetcher.route(&url(path), 200, &format!("asset {}", path));
    }
    fetcher
}

pub struct Harness {
    pub container: ServiceWorkerContainer,
    pub events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    pub fetcher: Arc<StaticFetcher>,
    pub tray: Arc<NotificationTray>,
    pub clients: Arc<Clients>,
    pub sync: Arc<ScriptedSync>,
}

impl Harness {
    pub fn new(fetcher: Arc<StaticFetcher>) -> Self {
        Self::with_storage(fetcher, CacheStorage::new())
    }

    pub fn with_storage(fetcher: Arc<StaticFetcher>, storage: CacheStorage) -> Self {
        let tray = Arc::new(NotificationTray::new());
        let clients = Arc::new(Clients::new());
        let sync = Arc::new(ScriptedSync::failing());

        let platform = Platform {
            fetcher: fetcher.clone(),
            notifier: tray.clone(),
            clients: clients.clone(),
            sync: sync.clone(),
        };

        let (container, events) =
            ServiceWorkerContainer::with_storage(config(), platform, storage).unwrap();

        Self {
            container,
            events,
            fetcher,
            tray,
            clients,
            sync,
        }
    }

    /// Harness with a successfully installed and activated worker.
    pub async fn active() -> Self {
        let harness = Self::new(healthy_network());
        harness.container.install().await.unwrap();
        harness
    }

    pub fn drain_events(&mut self) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
