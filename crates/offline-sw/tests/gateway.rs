//! End-to-end behavior of the offline gateway against a scripted network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use offline_net::http::{HeaderMap, Method, StatusCode};
use offline_net::{NetError, Network, Request, Response};
use offline_sw::{
    GatewayConfig, Registration, ResponseSource, ServiceWorkerError, ServiceWorkerState,
    WorkerHost,
};
use url::Url;

const ORIGIN: &str = "https://chat.example/";

/// Network that serves `content:<path>` for every path, can be switched
/// offline, fails the paths listed in `broken`, and records every call.
#[derive(Default)]
struct ScriptedNetwork {
    offline: AtomicBool,
    broken: Mutex<Vec<String>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Method, String, Option<Bytes>)>>,
}

impl ScriptedNetwork {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn break_path(&self, path: &str) {
        self.broken.lock().unwrap().push(path.to_string());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Network for ScriptedNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                request.method.clone(),
                request.url.path().to_string(),
                request.body.clone(),
            ));

            if self.offline.load(Ordering::SeqCst) {
                return Err(NetError::Unreachable(request.url.to_string()));
            }
            if self
                .broken
                .lock()
                .unwrap()
                .iter()
                .any(|p| p == request.url.path())
            {
                return Err(NetError::RequestFailed(format!("{} is broken", request.url)));
            }

            let body = format!("content:{}", request.url.path());
            Ok(Response::new(
                request.url,
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from(body),
            ))
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("offline_sw=debug")
        .with_test_writer()
        .try_init();
}

fn config(name: &str, precache: &[&str]) -> GatewayConfig {
    GatewayConfig {
        origin: Url::parse(ORIGIN).unwrap(),
        cache_name: name.to_string(),
        precache: precache.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
    .with_click_url(Url::parse("https://chat.example/rooms").unwrap())
}

fn setup() -> (Arc<ScriptedNetwork>, Registration) {
    init_tracing();
    let network = Arc::new(ScriptedNetwork::default());
    let (host, _rx) = WorkerHost::new(network.clone());
    let registration = Registration::new(Url::parse(ORIGIN).unwrap(), host);
    (network, registration)
}

fn get(path: &str) -> Request {
    Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
}

#[tokio::test]
async fn precached_get_is_served_without_network() {
    let (network, reg) = setup();
    let default_manifest = GatewayConfig::default().precache;
    let paths: Vec<&str> = default_manifest.iter().map(String::as_str).collect();
    reg.update(config("v1", &paths)).await.unwrap();

    let calls_after_install = network.calls();
    assert_eq!(calls_after_install, 5);

    for path in &paths {
        let response = reg.fetch(get(path)).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(
            response.response.text().unwrap(),
            format!("content:{}", path)
        );
    }
    assert_eq!(network.calls(), calls_after_install);
}

#[tokio::test]
async fn precached_get_survives_going_offline() {
    let (network, reg) = setup();
    reg.update(config("v1", &["/index.html"])).await.unwrap();
    network.set_offline(true);

    let response = reg.fetch(get("/index.html")).await.unwrap();
    assert!(response.from_cache());
}

#[tokio::test]
async fn precached_page_matches_with_fragment_while_offline() {
    let (network, reg) = setup();
    reg.update(config("v1", &["/index.html"])).await.unwrap();
    network.set_offline(true);

    let response = reg.fetch(get("/index.html#room-lobby")).await.unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text().unwrap(), "content:/index.html");
}

#[tokio::test]
async fn non_get_bypasses_cache_and_is_forwarded_unmodified() {
    let (network, reg) = setup();
    reg.update(config("v1", &["/api/subscribe"])).await.unwrap();

    let body = Bytes::from_static(b"{\"endpoint\":\"e\"}");
    let request = Request::post(get("/api/subscribe").url, body.clone());
    let response = reg.fetch(request).await.unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    let seen = network.seen.lock().unwrap();
    let (method, path, sent) = seen.last().unwrap();
    assert_eq!(method, &Method::POST);
    assert_eq!(path, "/api/subscribe");
    assert_eq!(sent.as_ref(), Some(&body));
}

#[tokio::test]
async fn non_get_network_error_is_not_masked() {
    let (network, reg) = setup();
    reg.update(config("v1", &[])).await.unwrap();
    network.set_offline(true);

    let request = Request::new(Method::DELETE, get("/clear/lobby").url);
    let result = reg.fetch(request).await;

    assert!(matches!(result, Err(NetError::Unreachable(_))));
}

#[tokio::test]
async fn uncached_get_returns_live_response_without_storing_it() {
    let (network, reg) = setup();
    reg.update(config("v1", &["/"])).await.unwrap();

    let first = reg.fetch(get("/about.html")).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.response.text().unwrap(), "content:/about.html");

    let calls = network.calls();
    let second = reg.fetch(get("/about.html")).await.unwrap();
    assert_eq!(second.source, ResponseSource::Network);
    assert_eq!(network.calls(), calls + 1);

    let caches = reg.host().caches.read().await;
    assert_eq!(caches.get("v1").unwrap().len(), 1);
}

#[tokio::test]
async fn uncached_get_offline_returns_fallback() {
    let (network, reg) = setup();
    reg.update(config("v1", &["/"])).await.unwrap();
    network.set_offline(true);

    let response = reg.fetch(get("/blog.html")).await.unwrap();

    assert!(response.is_fallback());
    assert_eq!(response.response.status, StatusCode::OK);
    assert_eq!(response.response.text().unwrap(), "⚠️ Offline mode");
}

#[tokio::test]
async fn activation_leaves_only_current_generation() {
    let (_network, reg) = setup();
    {
        let mut caches = reg.host().caches.write().await;
        caches.open("chat-v0");
        caches.open("legacy-assets");
    }

    reg.update(config("chat-v1", &["/"])).await.unwrap();
    assert_eq!(reg.host().caches.read().await.keys(), vec!["chat-v1"]);

    reg.update(config("chat-v2", &["/"])).await.unwrap();
    assert_eq!(reg.host().caches.read().await.keys(), vec!["chat-v2"]);
}

#[tokio::test]
async fn failed_install_persists_nothing_and_keeps_controller() {
    let (network, reg) = setup();
    let v1 = reg.update(config("v1", &["/"])).await.unwrap();

    network.break_path("/a");
    let result = reg.update(config("v2", &["/", "/a"])).await;

    assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
    assert_eq!(reg.host().caches.read().await.keys(), vec!["v1"]);
    assert_eq!(reg.controller().await.unwrap().id, v1.id);
    assert_eq!(v1.state().await, ServiceWorkerState::Activated);
    assert!(reg.installing().await.is_none());

    let response = reg.fetch(get("/")).await.unwrap();
    assert!(response.from_cache());
}

#[tokio::test]
async fn failed_first_install_leaves_no_controller() {
    let (network, reg) = setup();
    network.break_path("/a");

    let result = reg.update(config("v1", &["/a"])).await;

    assert!(result.is_err());
    assert!(reg.host().caches.read().await.keys().is_empty());
    assert!(reg.controller().await.is_none());
}

#[tokio::test]
async fn push_with_title_and_body() {
    let (_network, reg) = setup();
    reg.update(config("v1", &[])).await.unwrap();

    let shown = reg
        .push(Some(Bytes::from_static(br#"{"title":"T","body":"B"}"#)))
        .await
        .unwrap();

    assert_eq!(shown.title, "T");
    assert_eq!(shown.body, "B");
    assert_eq!(shown.icon, "/icons/icon-192x192.png");
}

#[tokio::test]
async fn push_with_empty_object_uses_defaults() {
    let (_network, reg) = setup();
    reg.update(config("v1", &[])).await.unwrap();

    let shown = reg.push(Some(Bytes::from_static(b"{}"))).await.unwrap();

    assert_eq!(shown.title, "Push Notification");
    assert_eq!(shown.body, "You have a new notification!");
}

#[tokio::test]
async fn push_with_malformed_payload_still_notifies() {
    let (_network, reg) = setup();
    reg.update(config("v1", &[])).await.unwrap();

    let shown = reg.push(Some(Bytes::from_static(b"{oops"))).await.unwrap();

    assert_eq!(shown.title, "Push Notification");
    assert_eq!(reg.host().notifications.read().await.active().len(), 1);
}

#[tokio::test]
async fn notification_click_closes_and_opens_configured_window() {
    let (_network, reg) = setup();
    reg.update(config("v1", &[])).await.unwrap();
    let shown = reg.push(None).await.unwrap();

    let client = reg.notification_click(shown.id).await.unwrap();

    assert_eq!(client.url.as_str(), "https://chat.example/rooms");
    assert!(client.focused);
    assert!(reg.host().notifications.read().await.get(shown.id).is_none());

    let second = reg.push(None).await.unwrap();
    let again = reg.notification_click(second.id).await.unwrap();
    assert_eq!(again.id, client.id);
    assert_eq!(reg.host().clients.read().await.len(), 1);
}
