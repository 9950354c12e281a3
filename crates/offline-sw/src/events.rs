//! Event dispatch table.
//!
//! Every event a worker can receive is routed by kind through a table that is
//! built once per process and shared by all worker versions.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use offline_net::Request;
use tracing::trace;

use crate::clients::Client;
use crate::notifications::{Notification, NotificationId};
use crate::worker::{FetchResponse, OfflineGateway};
use crate::ServiceWorkerError;

/// An event delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Bytes>),
    NotificationClick(NotificationId),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// Event kind, the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
        }
    }
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed,
    Activated { deleted: Vec<String> },
    /// The worker answered the request.
    Responded(FetchResponse),
    /// The worker declined; the request goes to the network untouched.
    Passthrough(Request),
    NotificationShown(Notification),
    WindowOpened(Client),
}

type EventHandler = Box<
    dyn Fn(Arc<OfflineGateway>, WorkerEvent) -> BoxFuture<'static, Result<EventOutcome, ServiceWorkerError>>
        + Send
        + Sync,
>;

/// Routes events to handlers by kind.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, EventHandler>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gateway's listeners, registered on first use.
    pub fn gateway() -> &'static EventDispatcher {
        static TABLE: OnceLock<EventDispatcher> = OnceLock::new();
        TABLE.get_or_init(Self::build_gateway)
    }

    fn build_gateway() -> Self {
        let mut table = Self::new();
        table.on(EventKind::Install, |w, e| Box::pin(on_install(w, e)));
        table.on(EventKind::Activate, |w, e| Box::pin(on_activate(w, e)));
        table.on(EventKind::Fetch, |w, e| Box::pin(on_fetch(w, e)));
        table.on(EventKind::Push, |w, e| Box::pin(on_push(w, e)));
        table.on(EventKind::NotificationClick, |w, e| {
            Box::pin(on_notification_click(w, e))
        });
        table
    }

    /// Register the handler for a kind, replacing any previous one.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<OfflineGateway>, WorkerEvent) -> BoxFuture<'static, Result<EventOutcome, ServiceWorkerError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run the handler for `event`; resolves once all of its work is done.
    pub async fn dispatch(
        &self,
        worker: Arc<OfflineGateway>,
        event: WorkerEvent,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        let kind = event.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| {
            ServiceWorkerError::NotFound(format!("no {} listener", kind.as_str()))
        })?;

        trace!(worker = %worker.id, event = kind.as_str(), "Dispatching");
        handler(worker, event).await
    }
}

type HandlerResult = Result<EventOutcome, ServiceWorkerError>;

async fn on_install(worker: Arc<OfflineGateway>, _: WorkerEvent) -> HandlerResult {
    worker.install().await?;
    Ok(EventOutcome::Installed)
}

async fn on_activate(worker: Arc<OfflineGateway>, _: WorkerEvent) -> HandlerResult {
    let deleted = worker.activate().await?;
    Ok(EventOutcome::Activated { deleted })
}

async fn on_fetch(worker: Arc<OfflineGateway>, event: WorkerEvent) -> HandlerResult {
    let WorkerEvent::Fetch(request) = event else {
        return Err(mismatched(EventKind::Fetch));
    };
    Ok(match worker.handle_fetch(&request).await {
        Some(response) => EventOutcome::Responded(response),
        None => EventOutcome::Passthrough(request),
    })
}

async fn on_push(worker: Arc<OfflineGateway>, event: WorkerEvent) -> HandlerResult {
    let WorkerEvent::Push(data) = event else {
        return Err(mismatched(EventKind::Push));
    };
    let notification = worker.handle_push(data.as_deref()).await;
    Ok(EventOutcome::NotificationShown(notification))
}

async fn on_notification_click(worker: Arc<OfflineGateway>, event: WorkerEvent) -> HandlerResult {
    let WorkerEvent::NotificationClick(id) = event else {
        return Err(mismatched(EventKind::NotificationClick));
    };
    let client = worker.handle_notification_click(id).await?;
    Ok(EventOutcome::WindowOpened(client))
}

fn mismatched(kind: EventKind) -> ServiceWorkerError {
    ServiceWorkerError::StateError(format!("{} listener got another event", kind.as_str()))
}
