//! Gateway configuration

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Assets fetched into the cache at install time.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

/// Body of the response served when a GET misses the cache and the network is down.
pub const OFFLINE_BODY: &str = "⚠️ Offline mode";

/// Configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Origin the precache paths are resolved against
    pub origin: Url,

    /// Name of the current cache generation
    pub cache_name: String,

    /// Precache manifest, in fetch order
    pub precache: Vec<String>,

    /// Push notification settings
    pub push: PushConfig,

    /// Window opened (or focused) when a notification is clicked
    pub notification_click_url: Option<Url>,

    /// Body of the offline fallback response
    pub offline_body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Icon shown with every notification
    pub icon: String,

    /// Title used when the payload has none
    pub default_title: String,

    /// Body used when the payload has none
    pub default_body: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://127.0.0.1:8000/").expect("static origin parses"),
            cache_name: "offline-gateway-v1".to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            push: PushConfig::default(),
            notification_click_url: None,
            offline_body: OFFLINE_BODY.to_string(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            // Differs from the precached icon names; served as configured.
            icon: "/icons/icon-192x192.png".to_string(),
            default_title: "Push Notification".to_string(),
            default_body: "You have a new notification!".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))
    }

    /// Set the notification click target.
    pub fn with_click_url(mut self, url: Url) -> Self {
        self.notification_click_url = Some(url);
        self
    }

    /// Check that the configuration can drive a worker.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "cache_name must not be empty".to_string(),
            ));
        }
        if self.notification_click_url.is_none() {
            return Err(ServiceWorkerError::ConfigError(
                "notification_click_url is required".to_string(),
            ));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::ConfigError(format!(
                "origin {} cannot resolve relative paths",
                self.origin
            )));
        }
        self.precache_urls().map(|_| ())
    }

    /// Resolve a path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("{}: {}", path, e)))
    }

    /// The precache manifest as absolute URLs.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    /// Notification click target; only `None` before validation.
    pub fn click_url(&self) -> Result<&Url, ServiceWorkerError> {
        self.notification_click_url.as_ref().ok_or_else(|| {
            ServiceWorkerError::ConfigError("notification_click_url is required".to_string())
        })
    }
}
