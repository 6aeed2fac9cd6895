//! Fetch interception: cache first, network fallback, selective bypass.

use std::sync::Arc;

use http::{Method, StatusCode};
use swkit_net::{Request, Response};
use tracing::{debug, trace, warn};

use crate::agent::ServiceWorkerAgent;
use crate::cache::CacheKey;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

/// What the agent decided to do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
    /// Not handled; the host performs its default network fetch.
    Passthrough,
    /// Answer the page with this response.
    Respond(Response),
}

impl FetchDisposition {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchDisposition::Passthrough)
    }
}

impl ServiceWorkerAgent {
    /// Handle a fetch event.
    ///
    /// A cache write triggered by a miss is attached to `event` and may still
    /// be running when this returns.
    pub async fn on_fetch(
        &self,
        request: Request,
        event: &mut ExtendableEvent,
    ) -> Result<FetchDisposition, ServiceWorkerError> {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Non-GET request, not intercepting");
            return Ok(FetchDisposition::Passthrough);
        }

        if self.config.bypass.matches(&request.url) {
            debug!(url = %request.url, "Bypassing cache for live request");
            return Ok(FetchDisposition::Passthrough);
        }

        let key = CacheKey::for_request(&request);
        let cached = self
            .caches
            .read()
            .await
            .match_in(&self.config.cache_name, &key);

        if let Some(response) = cached {
            debug!(url = %key.url, "Serving from cache");
            return Ok(FetchDisposition::Respond(response));
        }

        let response = self.platform.fetcher.fetch(request).await?;

        if response.status != StatusCode::OK {
            debug!(url = %key.url, status = %response.status, "Not caching non-200 response");
            return Ok(FetchDisposition::Respond(response));
        }

        let copy = response.clone();
        let caches = Arc::clone(&self.caches);
        let cache_name = self.config.cache_name.clone();

        event.wait_until(async move {
            let url = key.url.clone();
            match caches.write().await.put(&cache_name, key, copy) {
                Ok(()) => trace!(cache = %cache_name, url = %url, "Cached network response"),
                // Logged and swallowed: the response is already with the page.
                Err(e) => warn!(cache = %cache_name, url = %url, error = %e, "Cache write failed"),
            }
            Ok(())
        });

        Ok(FetchDisposition::Respond(response))
    }
}
