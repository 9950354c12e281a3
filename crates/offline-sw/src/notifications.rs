//! Push payloads and the notifications they produce.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PushConfig;

/// Body of a push message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushPayload {
    /// Parse a push body.
    ///
    /// A missing or empty body is `{}`. A body that is not a JSON object with
    /// optional string fields falls back to `{}` and logs a warning, so the
    /// user still sees a notification.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let data = match data {
            Some(d) if !d.iter().all(u8::is_ascii_whitespace) => d,
            _ => return Self::default(),
        };

        match serde_json::from_slice(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, len = data.len(), "Malformed push payload, using defaults");
                Self::default()
            }
        }
    }

    /// Title to display.
    pub fn title_or<'a>(&'a self, config: &'a PushConfig) -> &'a str {
        self.title.as_deref().unwrap_or(&config.default_title)
    }

    /// Body text to display.
    pub fn body_or<'a>(&'a self, config: &'a PushConfig) -> &'a str {
        self.body.as_deref().unwrap_or(&config.default_body)
    }
}

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// An OS-level notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub shown_at: Instant,
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: HashMap<NotificationId, Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification.
    pub fn show(&mut self, title: &str, body: &str, icon: &str) -> Notification {
        let notification = Notification {
            id: NotificationId::new(),
            title: title.to_string(),
            body: body.to_string(),
            icon: icon.to_string(),
            shown_at: Instant::now(),
        };

        info!(id = notification.id.raw(), title = %title, "Notification shown");
        self.shown.insert(notification.id, notification.clone());
        notification
    }

    /// Close a notification, returning it if it was still shown.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Shown notifications, oldest first.
    pub fn active(&self) -> Vec<&Notification> {
        let mut all: Vec<&Notification> = self.shown.values().collect();
        all.sort_by_key(|n| n.id.0);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let payload = PushPayload::parse(Some(br#"{"title":"T","body":"B"}"#));
        let config = PushConfig::default();
        assert_eq!(payload.title_or(&config), "T");
        assert_eq!(payload.body_or(&config), "B");
    }

    #[test]
    fn test_parse_empty_object_uses_defaults() {
        let payload = PushPayload::parse(Some(b"{}"));
        let config = PushConfig::default();
        assert_eq!(payload.title_or(&config), "Push Notification");
        assert_eq!(payload.body_or(&config), "You have a new notification!");
    }

    #[test]
    fn test_parse_missing_body() {
        assert_eq!(PushPayload::parse(None), PushPayload::default());
        assert_eq!(PushPayload::parse(Some(b"  ")), PushPayload::default());
    }

    #[test]
    fn test_parse_malformed_falls_back() {
        assert_eq!(PushPayload::parse(Some(b"not json")), PushPayload::default());
        assert_eq!(PushPayload::parse(Some(b"[1,2]")), PushPayload::default());
        assert_eq!(
            PushPayload::parse(Some(br#"{"title":5}"#)),
            PushPayload::default()
        );
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let payload = PushPayload::parse(Some(br#"{"title":"T","url":"/x"}"#));
        assert_eq!(payload.title.as_deref(), Some("T"));
        assert_eq!(payload.body, None);
    }

    #[test]
    fn test_show_and_close() {
        let mut center = NotificationCenter::new();
        let n = center.show("T", "B", "/icons/icon-192x192.png");

        assert_eq!(center.active().len(), 1);
        assert_eq!(center.get(n.id).unwrap().title, "T");
        assert!(center.close(n.id).is_some());
        assert!(center.close(n.id).is_none());
        assert!(center.active().is_empty());
    }
}
