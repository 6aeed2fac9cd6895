//! Push messages and the notifications they surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agent::ServiceWorkerAgent;
use crate::config::NotificationDefaults;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

/// Fields a JSON push payload may override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushFields {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    /// Opaque application data forwarded to the notification.
    pub data: Option<Value>,
}

/// A decoded push payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    /// No payload, or a zero-length one.
    Empty,
    /// A JSON object.
    Json(PushFields),
    /// Anything that is not a JSON object or `null`, used verbatim as the body.
    Text(String),
}

impl PushFields {
    /// Take the string fields of `object`; anything else in their place is
    /// ignored.
    fn from_object(mut object: Map<String, Value>) -> Self {
        let mut string = |key: &str| match object.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                debug!(field = key, value = %other, "Ignoring non-string push field");
                None
            }
            None => None,
        };

        Self {
            title: string("title"),
            body: string("body"),
            icon: string("icon"),
            badge: string("badge"),
            data: object.remove("data"),
        }
    }
}

impl PushPayload {
    /// Decode raw push bytes. Never fails: data that is not JSON, or JSON
    /// that is neither an object nor `null`, becomes text.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let bytes = match data {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return PushPayload::Empty,
        };

        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Null) => PushPayload::Empty,
            Ok(Value::Object(object)) => PushPayload::Json(PushFields::from_object(object)),
            Ok(_) => PushPayload::Text(String::from_utf8_lossy(bytes).into_owned()),
            Err(e) => {
                debug!(error = %e, "Push payload is not JSON, using it as text");
                PushPayload::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

/// Notification as handed to the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub data: Value,
}

impl NotificationDescriptor {
    /// The notification shown for a push without payload.
    pub fn from_defaults(defaults: &NotificationDefaults) -> Self {
        Self {
            title: defaults.title.clone(),
            body: defaults.body.clone(),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            tag: defaults.tag.clone(),
            require_interaction: false,
            data: Value::Object(Default::default()),
        }
    }

    /// Merge a push payload over the defaults.
    pub fn from_push(defaults: &NotificationDefaults, payload: PushPayload) -> Self {
        let mut notification = Self::from_defaults(defaults);
        match payload {
            PushPayload::Empty => {}
            PushPayload::Text(text) => notification.body = text,
            PushPayload::Json(fields) => {
                if let Some(title) = fields.title {
                    notification.title = title;
                }
                if let Some(body) = fields.body {
                    notification.body = body;
                }
                if let Some(icon) = fields.icon {
                    notification.icon = icon;
                }
                if let Some(badge) = fields.badge {
                    notification.badge = badge;
                }
                if let Some(data) = fields.data {
                    notification.data = data;
                }
            }
        }
        notification
    }
}

/// OS notification surface.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a notification, replacing any visible one with the same tag.
    async fn show(&self, notification: NotificationDescriptor) -> Result<(), ServiceWorkerError>;

    /// Close the notification with `tag`, if visible.
    async fn close(&self, tag: &str);
}

/// In-memory notification surface: at most one visible notification per tag.
#[derive(Debug, Default)]
pub struct NotificationTray {
    visible: Mutex<Vec<NotificationDescriptor>>,
}

impl NotificationTray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently visible notifications, oldest first.
    pub async fn visible(&self) -> Vec<NotificationDescriptor> {
        self.visible.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for NotificationTray {
    async fn show(&self, notification: NotificationDescriptor) -> Result<(), ServiceWorkerError> {
        let mut visible = self.visible.lock().await;
        visible.retain(|n| n.tag != notification.tag);
        visible.push(notification);
        Ok(())
    }

    async fn close(&self, tag: &str) {
        self.visible.lock().await.retain(|n| n.tag != tag);
    }
}

impl ServiceWorkerAgent {
    /// Handle a push message.
    pub fn on_push(&self, data: Option<&[u8]>, event: &mut ExtendableEvent) {
        let payload = PushPayload::parse(data);
        let notification = NotificationDescriptor::from_push(&self.config.notification, payload);
        let notifier = Arc::clone(&self.platform.notifier);

        info!(title = %notification.title, tag = %notification.tag, "Showing push notification");
        event.wait_until(async move { notifier.show(notification).await });
    }
}
