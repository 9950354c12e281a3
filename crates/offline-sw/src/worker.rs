//! The offline gateway worker: one version of the service worker.

use std::sync::Arc;

use offline_net::http::Method;
use offline_net::{NetError, Network, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheStorage};
use crate::clients::{Client, Clients};
use crate::config::GatewayConfig;
use crate::notifications::{Notification, NotificationCenter, NotificationId, PushPayload};
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState};

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Current cache generation.
    Cache,
    /// Live network response.
    Network,
    /// Offline placeholder.
    Fallback,
}

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub source: ResponseSource,
    pub response: Response,
}

impl FetchResponse {
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ResponseSource::Fallback
    }
}

/// Events reported to the host.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        cache_name: String,
        new_state: ServiceWorkerState,
    },
    /// Stale cache generations removed during activation.
    CachesDeleted { names: Vec<String> },
    /// A new worker controls the registration.
    ControllerChange { worker_id: ServiceWorkerId },
}

/// Facilities shared by every worker version: cache store, clients,
/// notifications and the network.
#[derive(Clone)]
pub struct WorkerHost {
    pub caches: Arc<RwLock<CacheStorage>>,
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: Arc<RwLock<NotificationCenter>>,
    pub network: Arc<dyn Network>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl WorkerHost {
    /// Create a host around a network; the receiver yields lifecycle events.
    pub fn new(network: Arc<dyn Network>) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches: Arc::new(RwLock::new(CacheStorage::new())),
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(NotificationCenter::new())),
                network,
                event_tx,
            },
            event_rx,
        )
    }

    pub(crate) fn emit(&self, event: ServiceWorkerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}

/// One version of the offline gateway worker.
pub struct OfflineGateway {
    pub id: ServiceWorkerId,
    config: GatewayConfig,
    state: RwLock<ServiceWorkerState>,
    host: WorkerHost,
}

impl std::fmt::Debug for OfflineGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineGateway")
            .field("id", &self.id)
            .field("cache_name", &self.config.cache_name)
            .finish_non_exhaustive()
    }
}

impl OfflineGateway {
    /// Create a worker for a validated configuration.
    pub fn new(config: GatewayConfig, host: WorkerHost) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            state: RwLock::new(ServiceWorkerState::Parsed),
            host,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: ServiceWorkerState) {
        *self.state.write().await = state;
        self.host.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            cache_name: self.config.cache_name.clone(),
            new_state: state,
        });
    }

    async fn transition(
        &self,
        from: ServiceWorkerState,
        to: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(ServiceWorkerError::StateError(format!(
                    "{} cannot move to {:?} from {:?}",
                    self.id, to, *state
                )));
            }
            *state = to;
        }
        self.host.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            cache_name: self.config.cache_name.clone(),
            new_state: to,
        });
        Ok(())
    }

    /// Install: precache every manifest entry into the current generation.
    ///
    /// Entries are fetched into a staged copy and committed only when every
    /// fetch succeeded; on failure the worker becomes redundant and the store
    /// is left untouched.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)
            .await?;

        let name = self.cache_name();
        let mut staged = self
            .host
            .caches
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| Cache::new(name));

        let result = match self.config.precache_urls() {
            Ok(urls) => staged.add_all(self.host.network.as_ref(), &urls).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(worker = %self.id, cache = %name, error = %e, "Install failed");
            self.set_state(ServiceWorkerState::Redundant).await;
            return Err(e);
        }

        let cached = staged.len();
        self.host.caches.write().await.insert(staged);
        self.set_state(ServiceWorkerState::Installed).await;
        info!(worker = %self.id, cache = %name, entries = cached, "Installed");
        Ok(())
    }

    /// Activate: delete every cache generation except the current one.
    /// Returns the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)
            .await?;

        let deleted = {
            let mut caches = self.host.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|n| n != self.cache_name())
                .collect();
            for name in &stale {
                caches.delete(name);
            }
            stale
        };

        if !deleted.is_empty() {
            debug!(worker = %self.id, deleted = ?deleted, "Stale caches removed");
            self.host.emit(ServiceWorkerEvent::CachesDeleted {
                names: deleted.clone(),
            });
        }

        self.set_state(ServiceWorkerState::Activated).await;
        info!(worker = %self.id, cache = %self.cache_name(), "Activated");
        Ok(deleted)
    }

    /// Fetch interception.
    ///
    /// Returns `None` for requests the gateway does not handle (anything but
    /// GET); those go to the network untouched. GETs are answered from the
    /// current generation, then the network, then the offline placeholder.
    pub async fn handle_fetch(&self, request: &Request) -> Option<FetchResponse> {
        if request.method != Method::GET {
            debug!(url = %request.url, method = %request.method, "Not intercepted");
            return None;
        }

        if let Some(response) = self.match_cached(request).await {
            debug!(url = %request.url, "Served from cache");
            return Some(FetchResponse {
                source: ResponseSource::Cache,
                response,
            });
        }

        match self.host.network.fetch(request.clone()).await {
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Served from network");
                Some(FetchResponse {
                    source: ResponseSource::Network,
                    response,
                })
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed, serving offline fallback");
                Some(FetchResponse {
                    source: ResponseSource::Fallback,
                    response: Response::text_plain(request.url.clone(), &self.config.offline_body),
                })
            }
        }
    }

    async fn match_cached(&self, request: &Request) -> Option<Response> {
        let caches = self.host.caches.read().await;
        let entry = caches.get(self.cache_name())?.match_request(request)?;
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Unreadable cache entry");
                None
            }
        }
    }

    /// Fetch as seen by a controlled page: intercepted GETs are always
    /// answered, everything else goes straight to the network.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse, NetError> {
        if let Some(response) = self.handle_fetch(&request).await {
            return Ok(response);
        }
        let response = self.host.network.fetch(request).await?;
        Ok(FetchResponse {
            source: ResponseSource::Network,
            response,
        })
    }

    /// Push: show a notification built from the payload.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        let payload = PushPayload::parse(data);
        let push = &self.config.push;

        self.host.notifications.write().await.show(
            payload.title_or(push),
            payload.body_or(push),
            &push.icon,
        )
    }

    /// Notification click: close it, then open or focus the configured window.
    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
    ) -> Result<Client, ServiceWorkerError> {
        let url = self.config.click_url()?;

        if self.host.notifications.write().await.close(id).is_none() {
            debug!(id = id.raw(), "Clicked notification was already closed");
        }

        let client = self.host.clients.write().await.open_or_focus(url);
        info!(client = %client.id, url = %url, "Notification click handled");
        Ok(client)
    }
}
