//! Registration: the installing, waiting and active worker versions of one scope.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use offline_net::{NetError, Request};
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GatewayConfig;
use crate::events::{EventDispatcher, EventOutcome, WorkerEvent};
use crate::notifications::{Notification, NotificationId};
use crate::worker::{FetchResponse, OfflineGateway, ResponseSource, ServiceWorkerEvent, WorkerHost};
use crate::{ServiceWorkerError, ServiceWorkerState};

#[derive(Debug, Default)]
struct Slots {
    installing: Option<Arc<OfflineGateway>>,
    waiting: Option<Arc<OfflineGateway>>,
    active: Option<Arc<OfflineGateway>>,
}

/// Holds an event open until dropped.
struct KeepAlive(Arc<AtomicUsize>);

impl KeepAlive {
    fn hold(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A service worker registration.
pub struct Registration {
    scope: Url,
    host: WorkerHost,
    slots: RwLock<Slots>,
    in_flight: Arc<AtomicUsize>,
    spawned: Mutex<Vec<AbortHandle>>,
    terminated: AtomicBool,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url, host: WorkerHost) -> Self {
        Self {
            scope,
            host,
            slots: RwLock::new(Slots::default()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            spawned: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn host(&self) -> &WorkerHost {
        &self.host
    }

    /// The worker controlling pages, if any.
    pub async fn controller(&self) -> Option<Arc<OfflineGateway>> {
        self.slots.read().await.active.clone()
    }

    pub async fn installing(&self) -> Option<Arc<OfflineGateway>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineGateway>> {
        self.slots.read().await.waiting.clone()
    }

    /// Events whose work is still held open.
    pub fn pending_events(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Install a new worker version and, once installed, promote it at once
    /// (skip-waiting) and activate it.
    ///
    /// If install fails the new version is discarded and the current
    /// controller keeps serving.
    pub async fn update(
        &self,
        config: GatewayConfig,
    ) -> Result<Arc<OfflineGateway>, ServiceWorkerError> {
        let worker = Arc::new(OfflineGateway::new(config, self.host.clone())?);
        self.slots.write().await.installing = Some(Arc::clone(&worker));

        if let Err(e) = self.run(&worker, WorkerEvent::Install).await {
            let mut slots = self.slots.write().await;
            if slots.installing.as_ref().is_some_and(|w| w.id == worker.id) {
                slots.installing = None;
            }
            warn!(scope = %self.scope, worker = %worker.id, error = %e, "Update rejected");
            return Err(e);
        }

        {
            let mut slots = self.slots.write().await;
            slots.installing = None;
            slots.waiting = Some(Arc::clone(&worker));
        }

        self.skip_waiting().await?;
        Ok(worker)
    }

    /// Promote the waiting worker: the previous controller becomes redundant
    /// and the new one is activated.
    pub async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        let (worker, previous) = {
            let mut slots = self.slots.write().await;
            let worker = slots
                .waiting
                .take()
                .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;
            let previous = slots.active.replace(Arc::clone(&worker));
            (worker, previous)
        };

        if let Some(previous) = previous {
            previous.set_state(ServiceWorkerState::Redundant).await;
        }
        self.host
            .emit(ServiceWorkerEvent::ControllerChange { worker_id: worker.id });

        self.run(&worker, WorkerEvent::Activate).await?;
        info!(scope = %self.scope, worker = %worker.id, cache = %worker.cache_name(), "Controller ready");
        Ok(())
    }

    /// Route an event to the controller.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        let worker = self
            .controller()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))?;
        self.run(&worker, event).await
    }

    async fn run(
        &self,
        worker: &Arc<OfflineGateway>,
        event: WorkerEvent,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        if self.is_terminated() {
            return Err(ServiceWorkerError::Terminated);
        }
        let _hold = KeepAlive::hold(&self.in_flight);
        EventDispatcher::gateway()
            .dispatch(Arc::clone(worker), event)
            .await
    }

    /// A request from a controlled page.
    ///
    /// Without a controller, or when the controller declines the request, it
    /// goes to the network untouched.
    pub async fn fetch(&self, request: Request) -> Result<FetchResponse, NetError> {
        let request = match self.dispatch(WorkerEvent::Fetch(request.clone())).await {
            Ok(EventOutcome::Responded(response)) => return Ok(response),
            Ok(EventOutcome::Passthrough(request)) => request,
            Ok(other) => {
                debug!(url = %request.url, outcome = ?other, "Fetch listener gave no response");
                request
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Fetch not handled by a worker");
                request
            }
        };

        let response = self.host.network.fetch(request).await?;
        Ok(FetchResponse {
            source: ResponseSource::Network,
            response,
        })
    }

    /// A push message for the controller.
    pub async fn push(&self, data: Option<Bytes>) -> Result<Notification, ServiceWorkerError> {
        match self.dispatch(WorkerEvent::Push(data)).await? {
            EventOutcome::NotificationShown(notification) => Ok(notification),
            other => Err(unexpected(other)),
        }
    }

    /// A click on a notification.
    pub async fn notification_click(
        &self,
        id: NotificationId,
    ) -> Result<crate::Client, ServiceWorkerError> {
        match self.dispatch(WorkerEvent::NotificationClick(id)).await? {
            EventOutcome::WindowOpened(client) => Ok(client),
            other => Err(unexpected(other)),
        }
    }

    /// Dispatch an event in the background; the event stays open until the
    /// task finishes or the registration is terminated.
    pub fn spawn_event(
        self: &Arc<Self>,
        event: WorkerEvent,
    ) -> JoinHandle<Result<EventOutcome, ServiceWorkerError>> {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.dispatch(event).await });

        let mut spawned = self.spawned.lock().unwrap_or_else(PoisonError::into_inner);
        spawned.retain(|h| !h.is_finished());
        spawned.push(handle.abort_handle());
        handle
    }

    /// Host-driven termination: abandon every spawned event and refuse new ones.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        let spawned = std::mem::take(
            &mut *self.spawned.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let abandoned = spawned.iter().filter(|h| !h.is_finished()).count();
        for handle in spawned {
            handle.abort();
        }
        info!(scope = %self.scope, abandoned, "Registration terminated");
    }
}

fn unexpected(outcome: EventOutcome) -> ServiceWorkerError {
    ServiceWorkerError::StateError(format!("unexpected outcome {:?}", outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use offline_net::{Network, Response};
    use std::time::Duration;

    /// Serves every URL, but waits first when the path is `/slow`.
    struct SlowNetwork;

    impl Network for SlowNetwork {
        fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
            Box::pin(async move {
                if request.url.path() == "/slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(Response::text_plain(request.url, "live"))
            })
        }
    }

    fn registration() -> Arc<Registration> {
        let (host, _rx) = WorkerHost::new(Arc::new(SlowNetwork));
        Arc::new(Registration::new(
            Url::parse("https://chat.example/").unwrap(),
            host,
        ))
    }

    fn config(name: &str) -> GatewayConfig {
        GatewayConfig {
            origin: Url::parse("https://chat.example/").unwrap(),
            cache_name: name.to_string(),
            precache: vec!["/".to_string()],
            ..Default::default()
        }
        .with_click_url(Url::parse("https://chat.example/").unwrap())
    }

    #[tokio::test]
    async fn test_update_promotes_immediately() {
        let reg = registration();
        let worker = reg.update(config("v1")).await.unwrap();

        assert_eq!(worker.state().await, ServiceWorkerState::Activated);
        assert!(reg.installing().await.is_none());
        assert!(reg.waiting().await.is_none());
        assert_eq!(reg.controller().await.unwrap().id, worker.id);
    }

    #[tokio::test]
    async fn test_update_retires_previous_controller() {
        let reg = registration();
        let v1 = reg.update(config("v1")).await.unwrap();
        let v2 = reg.update(config("v2")).await.unwrap();

        assert_eq!(v1.state().await, ServiceWorkerState::Redundant);
        assert_eq!(reg.controller().await.unwrap().id, v2.id);
        assert_eq!(reg.host().caches.read().await.keys(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_fetch_without_controller_goes_to_network() {
        let reg = registration();
        let request = Request::get(Url::parse("https://chat.example/").unwrap());
        let response = reg.fetch(request).await.unwrap();

        assert_eq!(response.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn test_push_without_controller_fails() {
        let reg = registration();
        assert!(reg.push(None).await.is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_and_terminate() {
        let reg = registration();
        reg.update(config("v1")).await.unwrap();
        assert_eq!(reg.pending_events(), 0);

        let slow = Request::get(Url::parse("https://chat.example/slow").unwrap());
        let handle = reg.spawn_event(WorkerEvent::Fetch(slow));
        tokio::task::yield_now().await;
        assert_eq!(reg.pending_events(), 1);

        reg.terminate();
        let joined = handle.await;
        assert!(joined.unwrap_err().is_cancelled());
        assert_eq!(reg.pending_events(), 0);

        assert!(matches!(
            reg.push(None).await,
            Err(ServiceWorkerError::Terminated)
        ));
    }

    #[tokio::test]
    async fn test_fetch_after_terminate_goes_to_network() {
        let reg = registration();
        reg.update(config("v1")).await.unwrap();
        reg.terminate();

        let request = Request::get(Url::parse("https://chat.example/").unwrap());
        let response = reg.fetch(request).await.unwrap();

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.response.text().unwrap(), "live");
    }
}
