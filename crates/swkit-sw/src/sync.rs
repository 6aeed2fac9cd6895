//! Background sync.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::agent::ServiceWorkerAgent;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

/// Deferred application work run when connectivity returns.
#[async_trait]
pub trait SyncDelegate: Send + Sync {
    async fn sync(&self, tag: &str) -> Result<(), ServiceWorkerError>;
}

/// Delegate for hosts without deferred work; always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

#[async_trait]
impl SyncDelegate for NoopSync {
    async fn sync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        debug!(tag, "Nothing to sync");
        Ok(())
    }
}

impl ServiceWorkerAgent {
    /// Handle a sync event. Only the configured score-sync tag does work;
    /// failures propagate so the host keeps the tag scheduled.
    pub fn on_sync(&self, tag: &str, event: &mut ExtendableEvent) {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return;
        }

        info!(tag, "Running background sync");
        let delegate = Arc::clone(&self.platform.sync);
        let tag = tag.to_string();
        event.wait_until(async move {
            delegate.sync(&tag).await.map_err(|e| match e {
                failed @ ServiceWorkerError::SyncFailed { .. } => failed,
                other => ServiceWorkerError::SyncFailed {
                    tag: tag.clone(),
                    reason: other.to_string(),
                },
            })
        });
    }
}
