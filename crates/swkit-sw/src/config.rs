//! Agent configuration.
//!
//! The cache name embeds [`CACHE_VERSION`]; bumping the version on redeploy
//! is what invalidates every previously cached response. Everything else has
//! compiled-in defaults that a JSON file may override.

use std::path::Path;

use serde::{Deserialize, Serialize};
use swkit_net::{BypassRules, UrlPattern};
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

macro_rules! cache_version {
    () => {
        "v1"
    };
}

/// Version tag of the current deployment.
pub const CACHE_VERSION: &str = cache_version!();

/// Name of the current cache store.
pub const CACHE_NAME: &str = concat!("game-cache-", cache_version!());

const DEFAULT_SCOPE: &str = "http://localhost/";

const DEFAULT_STATIC_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

/// Raw agent configuration, as compiled in or read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the current cache store.
    pub cache_name: String,

    /// Application scope; also the identity matched against window URLs.
    pub scope: String,

    /// Page opened when a notification click finds no window.
    pub start_url: String,

    /// Paths precached at install, resolved against `scope`.
    pub static_assets: Vec<String>,

    /// Requests that always go to the network.
    pub bypass: BypassRules,

    /// Notification defaults for push messages.
    pub notification: NotificationDefaults,

    /// Sync tag that triggers score synchronization.
    pub sync_tag: String,
}

/// Defaults for the notification shown on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// De-duplication tag; a newer notification replaces an older one.
    pub tag: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            start_url: "/".to_string(),
            static_assets: DEFAULT_STATIC_ASSETS.iter().map(|s| s.to_string()).collect(),
            bypass: BypassRules::new()
                .with(UrlPattern::path_contains("/api/"))
                .with(UrlPattern::host("supabase.co")),
            notification: NotificationDefaults::default(),
            sync_tag: "sync-scores".to_string(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Game Update".to_string(),
            body: "Something new is waiting for you!".to_string(),
            icon: "/icons/icon-192.png".to_string(),
            badge: "/icons/icon-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            tag: "game-notification".to_string(),
        }
    }
}

impl AgentConfig {
    /// Parse a JSON override; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("invalid config JSON: {}", e)))
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded agent config");
        Self::from_json_str(&contents)
    }

    /// Validate and resolve every URL against the scope.
    pub fn resolve(&self) -> Result<ResolvedConfig, ServiceWorkerError> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "cache_name must not be empty".to_string(),
            ));
        }

        let scope = Url::parse(&self.scope)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("scope '{}': {}", self.scope, e)))?;
        if scope.cannot_be_a_base() {
            return Err(ServiceWorkerError::ConfigError(format!(
                "scope '{}' cannot be used as a base URL",
                self.scope
            )));
        }

        let join = |path: &str| {
            scope
                .join(path)
                .map_err(|e| ServiceWorkerError::ConfigError(format!("path '{}': {}", path, e)))
        };

        let static_assets = self
            .static_assets
            .iter()
            .map(|path| join(path))
            .collect::<Result<Vec<_>, _>>()?;
        let start_url = join(&self.start_url)?;

        Ok(ResolvedConfig {
            cache_name: self.cache_name.clone(),
            scope,
            start_url,
            static_assets,
            bypass: self.bypass.clone(),
            notification: self.notification.clone(),
            sync_tag: self.sync_tag.clone(),
        })
    }
}

/// Configuration with every URL resolved. Immutable for the agent's lifetime.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub cache_name: String,
    pub scope: Url,
    pub start_url: Url,
    pub static_assets: Vec<Url>,
    pub bypass: BypassRules,
    pub notification: NotificationDefaults,
    pub sync_tag: String,
}
