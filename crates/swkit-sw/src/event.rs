//! Lifetime extension for event handlers.
//!
//! A handler may return before its work is done; anything passed to
//! [`ExtendableEvent::wait_until`] keeps running on the runtime and the host
//! awaits [`ExtendableEvent::settle`] before it may tear the agent down.
//! Dropping an event without settling aborts its outstanding work.

use std::fmt;
use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::ServiceWorkerError;

/// Kinds of events the host dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Sync,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// An event whose lifetime handlers can extend.
pub struct ExtendableEvent {
    kind: EventKind,
    pending: JoinSet<Result<(), ServiceWorkerError>>,
}

impl ExtendableEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pending: JoinSet::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Keep the event alive until `work` completes.
    ///
    /// The work starts immediately; it does not wait for `settle`.
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        self.pending.spawn(work);
    }

    /// Number of extensions not yet collected.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every extension. Returns the first failure, after all
    /// extensions have finished.
    pub async fn settle(mut self) -> Result<(), ServiceWorkerError> {
        let mut first_error = None;

        while let Some(joined) = self.pending.join_next().await {
            let outcome = joined
                .map_err(|e| ServiceWorkerError::ExtensionAborted(e.to_string()))
                .and_then(|result| result);

            if let Err(e) = outcome {
                warn!(event = %self.kind, error = %e, "Extended work failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(event = %self.kind, "Event settled");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_without_extensions() {
        let event = ExtendableEvent::new(EventKind::Push);
        assert_eq!(event.pending(), 0);
        assert!(event.settle().await.is_ok());
    }

    #[tokio::test]
    async fn test_settle_waits_for_slow_work() {
        let done = Arc::new(AtomicBool::new(false));
        let mut event = ExtendableEvent::new(EventKind::Fetch);

        let flag = Arc::clone(&done);
        event.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(!done.load(Ordering::SeqCst));
        event.settle().await.unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_settle_reports_failure_after_all_work_finishes() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut event = ExtendableEvent::new(EventKind::Sync);

        event.wait_until(async { Err(ServiceWorkerError::StateError("boom".to_string())) });
        let flag = Arc::clone(&finished);
        event.wait_until(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let result = event.settle().await;
        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_extension_is_an_error() {
        let mut event = ExtendableEvent::new(EventKind::Install);
        let explode = true;
        event.wait_until(async move {
            if explode {
                panic!("extension blew up");
            }
            Ok(())
        });

        assert!(matches!(
            event.settle().await,
            Err(ServiceWorkerError::ExtensionAborted(_))
        ));
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::NotificationClick.to_string(), "notificationclick");
    }
}
