//! # Offline SW
//!
//! Offline cache gateway: a service worker that keeps one versioned cache of
//! precached assets, answers GET requests cache-first with an offline
//! fallback, and turns push messages into notifications.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (drop stale generations), skip-waiting
//! - **Cache API**: named generations, `open`, `add_all`, `match_request`, `delete`, `keys`
//! - **Fetch Interception**: cache-first for GET, untouched passthrough for everything else
//! - **Push**: JSON payload to notification, click opens or focuses a window
//!
//! ## Architecture
//!
//! ```text
//! Registration
//!     ├── installing (OfflineGateway)
//!     ├── waiting    (OfflineGateway)
//!     └── active     (OfflineGateway) ── EventDispatcher
//!                                           ├── install
//!                                           ├── activate
//!                                           ├── fetch
//!                                           ├── push
//!                                           └── notificationclick
//!
//! WorkerHost (shared by every worker version)
//!     ├── CacheStorage ── Cache ── (method, url) → CacheEntry
//!     ├── Clients
//!     ├── NotificationCenter
//!     └── Network
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod events;
pub mod notifications;
pub mod registration;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, RequestKey};
pub use clients::{Client, Clients};
pub use config::{GatewayConfig, PushConfig};
pub use events::{EventDispatcher, EventKind, EventOutcome, WorkerEvent};
pub use notifications::{Notification, NotificationCenter, NotificationId, PushPayload};
pub use registration::Registration;
pub use worker::{FetchResponse, OfflineGateway, ResponseSource, ServiceWorkerEvent, WorkerHost};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker terminated")]
    Terminated,
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, no event dispatched yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}
