//! Bypass rules: requests that must always go live to the network.

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

/// URL pattern for matching.
///
/// Serialized externally tagged, e.g. `{"path_contains": "/api/"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlPattern {
    /// Exact URL match.
    Exact(String),
    /// Prefix match on the full URL.
    Prefix(String),
    /// Substring match on the URL path only.
    PathContains(String),
    /// Hostname match; also matches any subdomain.
    Host(String),
}

impl UrlPattern {
    /// Create a path substring pattern.
    pub fn path_contains(marker: &str) -> Self {
        Self::PathContains(marker.to_string())
    }

    /// Create a hostname pattern.
    pub fn host(domain: &str) -> Self {
        Self::Host(domain.trim_start_matches('.').to_ascii_lowercase())
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            UrlPattern::Exact(pattern) => url.as_str() == pattern,
            UrlPattern::Prefix(pattern) => url.as_str().starts_with(pattern.as_str()),
            UrlPattern::PathContains(marker) => url.path().contains(marker.as_str()),
            UrlPattern::Host(domain) => match url.host_str() {
                Some(host) => {
                    let domain = domain.to_ascii_lowercase();
                    host == domain
                        || host
                            .strip_suffix(domain.as_str())
                            .is_some_and(|rest| rest.ends_with('.'))
                }
                None => false,
            },
        }
    }
}

/// The set of patterns whose requests are never cached and never served
/// from cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BypassRules {
    patterns: Vec<UrlPattern>,
}

impl BypassRules {
    /// Create an empty rule set (nothing bypasses).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern.
    pub fn with(mut self, pattern: UrlPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Patterns in declaration order.
    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    /// Whether the URL must bypass the cache.
    pub fn matches(&self, url: &Url) -> bool {
        match self.patterns.iter().find(|p| p.matches(url)) {
            Some(pattern) => {
                trace!(url = %url, pattern = ?pattern, "Bypass rule matched");
                true
            }
            None => false,
        }
    }
}
